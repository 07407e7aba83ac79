// pipeline/src/state.rs

use anyhow::{anyhow, Result};
use common::analytics::AnalyticsSummary;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

/// Lo que cada etapa deja para las siguientes. Se clona barato (todo Arc).
#[derive(Clone, Default)]
pub struct PipelineState {
    // archivo elegido por check_raw_data
    pub raw_file: Arc<Mutex<Option<PathBuf>>>,
    pub etl: Arc<Mutex<Option<EtlSummary>>>,
    pub analytics: Arc<Mutex<Option<AnalyticsSummary>>>,
    pub report_path: Arc<Mutex<Option<PathBuf>>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EtlSummary {
    pub records: usize,
    pub skipped: usize,
    // grupos por dimensión
    pub groups: BTreeMap<String, usize>,
    pub outputs: Vec<PathBuf>,
}

/// Toma el lock sin `unwrap`: un mutex envenenado es un error de la etapa.
pub fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| anyhow!("estado del pipeline envenenado"))
}
