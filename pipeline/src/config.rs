use serde::Serialize;
use std::{env, path::PathBuf, str::FromStr};

use common::aggregator::DEFAULT_CHUNK_SIZE;
use common::fanout::DEFAULT_FANOUT_CONCURRENCY;

pub const DEFAULT_RAW_FILES: &str = "view_log_*.csv,data/raw/view_log_*.csv";
pub const DEFAULT_PROCESSED_DIR: &str = "data/processed";
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_TASK_ATTEMPTS: u32 = 1;
pub const DEFAULT_NOTIFY_RECIPIENT: &str = "data-team@company.com";

/// Metadatos del DAG. Informativos: el ejecutor no agenda nada.
#[derive(Debug, Clone, Serialize)]
pub struct DagConfig {
    pub dag_id: String,
    pub schedule: String,
    pub start_date: String,
    pub catchup: bool,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            dag_id: "ott_viewership_pipeline".to_string(),
            schedule: "0 2 * * *".to_string(),
            start_date: "2025-12-01".to_string(),
            catchup: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub dag: DagConfig,

    /// Rutas o patrones glob donde buscar el CSV crudo, en orden
    pub raw_candidates: Vec<String>,
    pub processed_dir: PathBuf,

    /// Registros por partición en el fold local del aggregator
    pub chunk_size: usize,
    /// Dimensiones agregadas a la vez
    pub fanout_concurrency: usize,

    pub top_n: usize,
    /// Si es false, una entrada sin registros hace fallar la etapa de ETL
    pub allow_empty_input: bool,
    /// Intentos por etapa (política de reintentos del driver)
    pub task_attempts: u32,
    pub notify_recipient: String,
}

impl PipelineConfig {
    /// Lee la configuración de variables de entorno, con defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = get("OTT_RAW_FILES").unwrap_or_else(|| DEFAULT_RAW_FILES.to_string());

        Self {
            dag: DagConfig::default(),
            raw_candidates: split_list(&raw),
            processed_dir: get("OTT_PROCESSED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCESSED_DIR)),
            chunk_size: parse_or(get("OTT_CHUNK_SIZE"), DEFAULT_CHUNK_SIZE),
            fanout_concurrency: parse_or(get("OTT_FANOUT_CONCURRENCY"), DEFAULT_FANOUT_CONCURRENCY)
                .max(1),
            top_n: parse_or(get("OTT_TOP_N"), DEFAULT_TOP_N),
            allow_empty_input: get("OTT_ALLOW_EMPTY_INPUT")
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
            task_attempts: parse_or(get("OTT_TASK_ATTEMPTS"), DEFAULT_TASK_ATTEMPTS).max(1),
            notify_recipient: get("OTT_NOTIFY_RECIPIENT")
                .unwrap_or_else(|| DEFAULT_NOTIFY_RECIPIENT.to_string()),
        }
    }

    pub fn analytics_path(&self) -> PathBuf {
        self.processed_dir.join("analytics.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.processed_dir.join("analysis_report.txt")
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: FromStr>(v: Option<String>, default: T) -> T {
    v.and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "si" | "sí"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_sin_variables() {
        let cfg = PipelineConfig::from_lookup(lookup(&[]));

        assert_eq!(cfg.raw_candidates, vec!["view_log_*.csv", "data/raw/view_log_*.csv"]);
        assert_eq!(cfg.processed_dir, PathBuf::from("data/processed"));
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.top_n, 10);
        assert!(!cfg.allow_empty_input);
        assert_eq!(cfg.task_attempts, 1);
        assert_eq!(cfg.dag.dag_id, "ott_viewership_pipeline");
        assert_eq!(cfg.report_path(), PathBuf::from("data/processed/analysis_report.txt"));
    }

    #[test]
    fn variables_pisan_los_defaults() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("OTT_RAW_FILES", " a.csv , ,b/*.csv"),
            ("OTT_PROCESSED_DIR", "/tmp/out"),
            ("OTT_CHUNK_SIZE", "128"),
            ("OTT_FANOUT_CONCURRENCY", "0"),
            ("OTT_ALLOW_EMPTY_INPUT", "true"),
            ("OTT_TASK_ATTEMPTS", "3"),
        ]));

        assert_eq!(cfg.raw_candidates, vec!["a.csv", "b/*.csv"]);
        assert_eq!(cfg.processed_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.chunk_size, 128);
        assert_eq!(cfg.fanout_concurrency, 1);
        assert!(cfg.allow_empty_input);
        assert_eq!(cfg.task_attempts, 3);
    }

    #[test]
    fn valores_invalidos_caen_al_default() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("OTT_TOP_N", "muchos"),
            ("OTT_ALLOW_EMPTY_INPUT", "quizas"),
        ]));
        assert_eq!(cfg.top_n, DEFAULT_TOP_N);
        assert!(!cfg.allow_empty_input);
    }
}
