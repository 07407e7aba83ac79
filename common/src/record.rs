use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Un evento de visualización. Inmutable una vez parseado.
/// Los duplicados son válidos: cada línea es un evento distinto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub user_id: String,
    pub show_id: String,
    pub duration_minutes: u64,
    pub device_type: String,
    pub view_date: String,
    pub genre: String,
}

/// Campos de un [`Record`] que pueden formar parte de una clave de agrupación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    UserId,
    ShowId,
    DurationMinutes,
    DeviceType,
    ViewDate,
    Genre,
}

impl RecordField {
    /// Nombre de la columna, igual al del CSV de entrada y al del JSON de salida.
    pub fn column_name(self) -> &'static str {
        match self {
            RecordField::UserId => "user_id",
            RecordField::ShowId => "show_id",
            RecordField::DurationMinutes => "duration_minutes",
            RecordField::DeviceType => "device_type",
            RecordField::ViewDate => "view_date",
            RecordField::Genre => "genre",
        }
    }

    fn value_of(self, rec: &Record) -> KeyValue {
        match self {
            RecordField::UserId => KeyValue::Text(rec.user_id.clone()),
            RecordField::ShowId => KeyValue::Text(rec.show_id.clone()),
            RecordField::DurationMinutes => KeyValue::Int(rec.duration_minutes),
            RecordField::DeviceType => KeyValue::Text(rec.device_type.clone()),
            RecordField::ViewDate => KeyValue::Text(rec.view_date.clone()),
            RecordField::Genre => KeyValue::Text(rec.genre.clone()),
        }
    }
}

/// Valor de una componente de clave. Se compara por igualdad exacta.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(u64),
    Text(String),
}

impl KeyValue {
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Int(n) => json!(n),
            KeyValue::Text(s) => json!(s),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::Text(s) => Some(s),
            KeyValue::Int(_) => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(n) => write!(f, "{n}"),
            KeyValue::Text(s) => f.write_str(s),
        }
    }
}

/// Tupla ordenada de una o más componentes que define una partición.
pub type GroupKey = Vec<KeyValue>;

/// Cualquier cosa capaz de calcular la clave de grupo de un elemento.
/// Las closures `Fn(&T) -> GroupKey` también sirven.
pub trait KeySelector<T>: Send + Sync {
    fn key(&self, item: &T) -> GroupKey;
}

impl<T, F> KeySelector<T> for F
where
    F: Fn(&T) -> GroupKey + Send + Sync,
{
    fn key(&self, item: &T) -> GroupKey {
        self(item)
    }
}

/// Proyección de un [`Record`] sobre una lista de campos, ej: (show_id, view_date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    fields: Vec<RecordField>,
}

impl Projection {
    /// Panics si `fields` está vacío: una clave necesita al menos una componente.
    pub fn new(fields: Vec<RecordField>) -> Self {
        assert!(!fields.is_empty(), "una proyección necesita al menos un campo");
        Self { fields }
    }

    pub fn single(field: RecordField) -> Self {
        Self::new(vec![field])
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.column_name()).collect()
    }
}

impl KeySelector<Record> for Projection {
    fn key(&self, item: &Record) -> GroupKey {
        self.fields.iter().map(|f| f.value_of(item)).collect()
    }
}

#[cfg(test)]
pub(crate) fn rec(user: &str, show: &str, minutes: u64) -> Record {
    Record {
        user_id: user.to_string(),
        show_id: show.to_string(),
        duration_minutes: minutes,
        device_type: "TV".to_string(),
        view_date: "2025-12-20".to_string(),
        genre: "Unknown".to_string(),
    }
}
