use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

use crate::accumulator::{AggregateFunction, AggregateResult, ViewMetrics};
use crate::aggregator::{aggregate_chunked, GroupedResults, DEFAULT_CHUNK_SIZE};
use crate::error::AggregateError;
use crate::record::{KeySelector, Projection, Record, RecordField};

/// Resultados del fan-out: nombre de dimensión → grupos de esa dimensión.
pub type DimensionResults<O = AggregateResult> = BTreeMap<String, GroupedResults<O>>;

pub const DEFAULT_FANOUT_CONCURRENCY: usize = 4;

pub const VIEWERSHIP_SUMMARY: &str = "viewership_summary";
pub const DEVICE_SUMMARY: &str = "device_summary";
pub const TOP_USER: &str = "top_user";
pub const GENRE_SUMMARY: &str = "genre_summary";

/// Las cuatro dimensiones del pipeline OTT.
pub fn standard_dimensions() -> BTreeMap<String, Projection> {
    BTreeMap::from([
        (
            VIEWERSHIP_SUMMARY.to_string(),
            Projection::new(vec![RecordField::ShowId, RecordField::ViewDate]),
        ),
        (
            DEVICE_SUMMARY.to_string(),
            Projection::single(RecordField::DeviceType),
        ),
        (TOP_USER.to_string(), Projection::single(RecordField::UserId)),
        (GENRE_SUMMARY.to_string(), Projection::single(RecordField::Genre)),
    ])
}

/// Corre un aggregator por dimensión sobre la misma entrada.
///
/// Cada dimensión es un `spawn_blocking` independiente con su propio estado;
/// lo único compartido es la entrada, de sólo lectura. Un semáforo limita
/// cuántas dimensiones corren a la vez.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_concurrency: usize,
    chunk_size: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_CONCURRENCY, DEFAULT_CHUNK_SIZE)
    }
}

impl FanOut {
    pub fn new(max_concurrency: usize, chunk_size: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            chunk_size,
        }
    }

    /// Las métricas de vistas ([`ViewMetrics`]) sobre cada proyección.
    pub async fn run(
        &self,
        records: Arc<Vec<Record>>,
        dimensions: &BTreeMap<String, Projection>,
    ) -> Result<DimensionResults, AggregateError> {
        self.run_with(records, dimensions, &ViewMetrics).await
    }

    /// Corre `func` sobre cada dimensión (nombre → selector de clave).
    ///
    /// Todas las dimensiones terminan o el llamado falla; nunca devuelve
    /// resultados parciales. Con entrada vacía cada dimensión queda vacía.
    pub async fn run_with<K, F>(
        &self,
        records: Arc<Vec<Record>>,
        dimensions: &BTreeMap<String, K>,
        func: &F,
    ) -> Result<DimensionResults<F::Output>, AggregateError>
    where
        K: KeySelector<Record> + Clone + 'static,
        F: AggregateFunction<Record> + Clone + 'static,
        F::Output: 'static,
    {
        let mut out: DimensionResults<F::Output> = BTreeMap::new();

        if records.is_empty() {
            info!(
                "entrada vacía: {} dimensiones sin grupos",
                dimensions.len()
            );
            for name in dimensions.keys() {
                out.insert(name.clone(), HashMap::new());
            }
            return Ok(out);
        }

        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();

        for (name, selector) in dimensions {
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AggregateError::DimensionFailed {
                    dimension: name.clone(),
                    reason: e.to_string(),
                })?;

            let records = Arc::clone(&records);
            let selector = selector.clone();
            let func = func.clone();
            let name = name.clone();
            let chunk_size = self.chunk_size;

            debug!("lanzando dimensión {}", name);

            set.spawn(async move {
                let dim = name.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let res = aggregate_chunked(records.as_slice(), &selector, &func, chunk_size);
                    // liberar el "slot" al terminar
                    drop(permit);
                    res
                });

                let res = match handle.await {
                    Ok(res) => res,
                    Err(e) => Err(AggregateError::DimensionFailed {
                        dimension: dim.clone(),
                        reason: format!("panic o join error: {e}"),
                    }),
                };
                (dim, res)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (name, res) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    set.abort_all();
                    return Err(AggregateError::DimensionFailed {
                        dimension: "<desconocida>".to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            match res {
                Ok(groups) => {
                    info!("dimensión {} lista: {} grupos", name, groups.len());
                    out.insert(name, groups);
                }
                Err(e) => {
                    warn!("dimensión {} falló: {}", name, e);
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(out)
    }
}
