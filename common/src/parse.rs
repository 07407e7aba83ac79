use anyhow::{Context, Result};
use std::{fs::File, io::Read, path::Path};
use tracing::{info, warn};

use crate::record::Record;

/// Género por defecto cuando el CSV no trae la columna.
pub const DEFAULT_GENRE: &str = "Unknown";

/// Registros válidos + cantidad de filas descartadas.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    pub skipped: usize,
}

/// Parsea una fila ya separada en columnas:
///   user_id, show_id, duration_minutes, device_type, view_date[, genre]
///
/// Devuelve `None` si la fila no sirve (columnas de menos, duración
/// no numérica o negativa).
pub fn parse_row(cols: &csv::StringRecord) -> Option<Record> {
    if cols.len() < 5 {
        return None;
    }

    let field = |i: usize| cols.get(i).unwrap_or("").trim();

    let duration = parse_duration(field(2))?;

    let genre = match cols.get(5).map(str::trim) {
        Some(g) if !g.is_empty() => g.to_string(),
        _ => DEFAULT_GENRE.to_string(),
    };

    Some(Record {
        user_id: field(0).to_string(),
        show_id: field(1).to_string(),
        duration_minutes: duration,
        device_type: field(3).to_string(),
        view_date: field(4).to_string(),
        genre,
    })
}

/// Minutos enteros. Los enteros se leen exactos; "12.9" se trunca a 12.
/// Negativos, no finitos o fuera de rango de `u64` no sirven.
pub fn parse_duration(s: &str) -> Option<u64> {
    if let Ok(n) = s.parse::<u64>() {
        return Some(n);
    }

    let d: f64 = s.parse().ok()?;
    // u64::MAX as f64 redondea a 2^64, que ya no entra
    if !d.is_finite() || d < 0.0 || d >= u64::MAX as f64 {
        return None;
    }
    Some(d.trunc() as u64)
}

/// Lee un CSV de eventos (con encabezado). Las filas malas se loguean
/// y se cuentan, nunca cortan la lectura.
pub fn read_records<R: Read>(reader: R) -> Result<ParseOutcome> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = ParseOutcome::default();

    for (idx, row) in rdr.records().enumerate() {
        // línea 1 = encabezado
        let line_no = idx + 2;
        match row {
            Ok(cols) => match parse_row(&cols) {
                Some(rec) => out.records.push(rec),
                None => {
                    warn!("saltando fila mala (línea {}): {:?}", line_no, cols);
                    out.skipped += 1;
                }
            },
            Err(e) => {
                warn!("saltando fila ilegible (línea {}): {}", line_no, e);
                out.skipped += 1;
            }
        }
    }

    Ok(out)
}

/// Igual que [`read_records`] pero desde un archivo.
pub fn read_records_file(path: &Path) -> Result<ParseOutcome> {
    let file = File::open(path)
        .with_context(|| format!("no se pudo abrir el CSV de entrada {}", path.display()))?;

    let outcome = read_records(file)
        .with_context(|| format!("error leyendo {}", path.display()))?;

    info!(
        "parseados {} registros de {} ({} filas descartadas)",
        outcome.records.len(),
        path.display(),
        outcome.skipped
    );

    Ok(outcome)
}
