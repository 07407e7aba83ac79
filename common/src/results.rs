use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::accumulator::AggregateResult;
use crate::aggregator::GroupedResults;
use crate::fanout::{
    DimensionResults, DEVICE_SUMMARY, GENRE_SUMMARY, TOP_USER, VIEWERSHIP_SUMMARY,
};
use crate::record::{GroupKey, Projection};

const METRIC_FIELDS: [&str; 4] = [
    "total_watch_time",
    "total_views",
    "unique_users",
    "avg_duration",
];
const TS_FIELD: &str = "processed_ts";

/// Subdirectorio de salida de cada dimensión, dentro del directorio procesado.
pub fn output_subdir(dimension: &str) -> &str {
    match dimension {
        VIEWERSHIP_SUMMARY => "summary",
        DEVICE_SUMMARY => "device_summary",
        TOP_USER => "top_user",
        GENRE_SUMMARY => "genre_summary",
        other => other,
    }
}

/// Ruta del shard único de una dimensión:
///   <processed>/<subdir>/<dimension>-00000-of-00001.json
pub fn shard_path(processed_dir: &Path, dimension: &str) -> PathBuf {
    processed_dir
        .join(output_subdir(dimension))
        .join(format!("{dimension}-00000-of-00001.json"))
}

/// Una línea del JSONL de salida: columnas de la clave + métricas.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// (columna, valor) en el orden de la proyección
    pub key: Vec<(String, Value)>,
    pub metrics: AggregateResult,
    pub processed_ts: Option<DateTime<Utc>>,
}

impl SummaryRow {
    pub fn new(
        projection: &Projection,
        key: &GroupKey,
        metrics: AggregateResult,
        processed_ts: DateTime<Utc>,
    ) -> Self {
        let key = projection
            .column_names()
            .into_iter()
            .zip(key.iter())
            .map(|(col, v)| (col.to_string(), v.to_json()))
            .collect();

        Self {
            key,
            metrics,
            processed_ts: Some(processed_ts),
        }
    }

    /// Valor de texto de una columna de la clave, ej: `row.key_str("show_id")`.
    pub fn key_str(&self, column: &str) -> Option<&str> {
        self.key
            .iter()
            .find(|(c, _)| c == column)
            .and_then(|(_, v)| v.as_str())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (col, v) in &self.key {
            obj.insert(col.clone(), v.clone());
        }
        obj.insert("total_watch_time".into(), json!(self.metrics.total_watch_time));
        obj.insert("total_views".into(), json!(self.metrics.total_views));
        obj.insert("unique_users".into(), json!(self.metrics.unique_users));
        obj.insert("avg_duration".into(), json!(self.metrics.avg_duration));
        if let Some(ts) = self.processed_ts {
            obj.insert(TS_FIELD.into(), json!(ts.to_rfc3339()));
        }
        Value::Object(obj)
    }

    /// Inversa de [`SummaryRow::to_json`]. Toda columna que no sea métrica
    /// ni timestamp se toma como parte de la clave, en el orden del archivo.
    pub fn from_json(v: Value) -> Result<Self> {
        let Value::Object(obj) = v else {
            bail!("se esperaba un objeto JSON");
        };

        let get_u64 = |name: &str| -> Result<u64> {
            obj.get(name)
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("campo {name} ausente o no entero"))
        };
        let total_watch_time = get_u64("total_watch_time")?;
        let total_views = get_u64("total_views")?;
        let unique_users = get_u64("unique_users")?;

        let avg_duration = obj
            .get("avg_duration")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("campo avg_duration ausente o no numérico"))?;

        let processed_ts = match obj.get(TS_FIELD) {
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .with_context(|| format!("processed_ts inválido: {s}"))?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        // con preserve_order el Map conserva el orden de inserción
        let key = obj
            .into_iter()
            .filter(|(k, _)| k != TS_FIELD && !METRIC_FIELDS.contains(&k.as_str()))
            .collect();

        Ok(Self {
            key,
            metrics: AggregateResult {
                total_watch_time,
                total_views,
                unique_users,
                avg_duration,
            },
            processed_ts,
        })
    }
}

/// Filas de una dimensión, ordenadas por clave para que la salida sea reproducible.
pub fn summary_rows(
    projection: &Projection,
    groups: &GroupedResults<AggregateResult>,
    processed_ts: DateTime<Utc>,
) -> Vec<SummaryRow> {
    let mut entries: Vec<(&GroupKey, &AggregateResult)> = groups.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    entries
        .into_iter()
        .map(|(k, r)| SummaryRow::new(projection, k, r.clone(), processed_ts))
        .collect()
}

/// Borra y vuelve a crear los directorios de salida de las dimensiones.
pub fn clean_output_dirs<'a, I>(processed_dir: &Path, dimensions: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for dim in dimensions {
        let dir = processed_dir.join(output_subdir(dim));
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("no se pudo borrar {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("no se pudo crear {}", dir.display()))?;
    }
    Ok(())
}

/// Escribe un JSON por línea. Crea la carpeta de salida si hace falta.
pub fn write_jsonl(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path).with_context(|| format!("no se pudo crear {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for row in rows {
        serde_json::to_writer(&mut writer, &row.to_json())?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(())
}

/// Lee un JSONL de filas resumen. Las líneas en blanco se ignoran.
pub fn read_jsonl(path: &Path) -> Result<Vec<SummaryRow>> {
    let file = File::open(path).with_context(|| format!("no se pudo abrir {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let v: Value = serde_json::from_str(&line)
            .with_context(|| format!("JSON inválido en {}:{}", path.display(), idx + 1))?;
        out.push(
            SummaryRow::from_json(v)
                .with_context(|| format!("fila inválida en {}:{}", path.display(), idx + 1))?,
        );
    }

    Ok(out)
}

/// Escribe todas las dimensiones, una por shard. Devuelve las rutas escritas.
pub fn write_dimension_results(
    processed_dir: &Path,
    dimensions: &BTreeMap<String, Projection>,
    results: &DimensionResults,
    processed_ts: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (name, groups) in results {
        let projection = dimensions
            .get(name)
            .ok_or_else(|| anyhow!("dimensión sin proyección: {name}"))?;

        let rows = summary_rows(projection, groups, processed_ts);
        let path = shard_path(processed_dir, name);
        write_jsonl(&path, &rows)?;

        info!("{}: {} filas en {}", name, rows.len(), path.display());
        written.push(path);
    }

    Ok(written)
}

/// Lee todos los shards `<dimension>-*.json` de una dimensión.
/// Sin archivos o sin filas es error.
pub fn load_dimension(processed_dir: &Path, dimension: &str) -> Result<Vec<SummaryRow>> {
    let pattern = processed_dir
        .join(output_subdir(dimension))
        .join(format!("{dimension}-*.json"));
    let files = crate::discovery::glob_files(&pattern.to_string_lossy())?;

    if files.is_empty() {
        bail!("no se encontraron shards de {} en {}", dimension, pattern.display());
    }

    let mut rows = Vec::new();
    for f in &files {
        rows.extend(read_jsonl(f)?);
    }

    if rows.is_empty() {
        bail!("los shards de {} están vacíos", dimension);
    }

    info!("cargadas {} filas de {} ({} shards)", rows.len(), dimension, files.len());
    Ok(rows)
}
