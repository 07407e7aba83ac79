// pipeline/src/stages.rs
//
// Las seis etapas del pipeline OTT y el armado del DAG que las encadena.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use std::{
    collections::BTreeMap,
    fs,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

use common::analytics::{self, AnalyticsSummary};
use common::discovery;
use common::fanout::VIEWERSHIP_SUMMARY;
use common::parse;
use common::report;
use common::results::{self, SummaryRow};
use common::{standard_dimensions, AggregateError, Dag, DagReport, FanOut, Task};

use crate::config::PipelineConfig;
use crate::state::{lock, EtlSummary, PipelineState};

pub const CHECK_RAW_DATA: &str = "check_raw_data";
pub const RUN_ETL_PIPELINE: &str = "run_etl_pipeline";
pub const VALIDATE_OUTPUT: &str = "validate_output";
pub const RUN_SQL_ANALYTICS: &str = "run_sql_analytics";
pub const GENERATE_REPORT: &str = "generate_report";
pub const SEND_NOTIFICATION: &str = "send_notification";

/* --------- Operaciones sueltas (también usadas por los subcomandos) --------- */

/// Parsea el CSV, corre el fan-out sobre las dimensiones estándar y escribe
/// un JSONL por dimensión (limpiando antes las carpetas de salida).
pub async fn aggregate_file(cfg: &PipelineConfig, raw: &Path) -> Result<EtlSummary> {
    let path = raw.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || parse::read_records_file(&path)).await??;

    if outcome.records.is_empty() {
        if !cfg.allow_empty_input {
            return Err(AggregateError::EmptyInput)
                .with_context(|| format!("{} no tiene registros válidos", raw.display()));
        }
        warn!("{} sin registros válidos: se escriben salidas vacías", raw.display());
    }

    let dims = standard_dimensions();
    let records = Arc::new(outcome.records);

    let fanout = FanOut::new(cfg.fanout_concurrency, cfg.chunk_size);
    let dim_results = fanout.run(Arc::clone(&records), &dims).await?;

    results::clean_output_dirs(&cfg.processed_dir, dims.keys().map(String::as_str))?;
    let outputs =
        results::write_dimension_results(&cfg.processed_dir, &dims, &dim_results, Utc::now())?;

    let groups: BTreeMap<String, usize> = dim_results
        .iter()
        .map(|(name, g)| (name.clone(), g.len()))
        .collect();

    Ok(EtlSummary {
        records: records.len(),
        skipped: outcome.skipped,
        groups,
        outputs,
    })
}

/// Rollups sobre el resumen por show/día. Escribe `analytics.json`.
pub fn analyze_rows(cfg: &PipelineConfig, rows: &[SummaryRow]) -> Result<AnalyticsSummary> {
    let summary = analytics::run_analytics(rows, cfg.top_n)?;
    analytics::write_analytics(&cfg.analytics_path(), &summary)?;
    Ok(summary)
}

/// Renderiza y escribe el reporte de texto. Devuelve la ruta escrita.
pub fn report_rows(cfg: &PipelineConfig, rows: &[SummaryRow]) -> Result<PathBuf> {
    let text = report::render_report(rows, cfg.top_n, Utc::now());
    let path = cfg.report_path();
    report::write_report(&path, &text)?;
    Ok(path)
}

/// Filas del resumen por show/día. Con una entrada vacía permitida no hay
/// nada que cargar y las etapas siguientes trabajan sobre cero filas.
fn summary_rows_for(cfg: &PipelineConfig, state: &PipelineState) -> Result<Vec<SummaryRow>> {
    let empty_run = lock(&state.etl)?
        .as_ref()
        .map(|etl| etl.records == 0)
        .unwrap_or(false);

    if empty_run && cfg.allow_empty_input {
        return Ok(Vec::new());
    }
    results::load_dimension(&cfg.processed_dir, VIEWERSHIP_SUMMARY)
}

/* --------- Etapas --------- */

pub async fn check_raw_data(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let raw = discovery::find_raw_file(&cfg.raw_candidates)?;
    let size = fs::metadata(&raw)
        .with_context(|| format!("no se pudo leer metadata de {}", raw.display()))?
        .len();

    info!("archivo crudo: {} ({:.2} MB)", raw.display(), size as f64 / 1_048_576.0);
    *lock(&state.raw_file)? = Some(raw);
    Ok(())
}

pub async fn run_etl_pipeline(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let raw = lock(&state.raw_file)?
        .clone()
        .ok_or_else(|| anyhow!("no hay archivo crudo registrado por {CHECK_RAW_DATA}"))?;

    let summary = aggregate_file(&cfg, &raw).await?;
    info!(
        "ETL: {} registros ({} descartados), {} dimensiones escritas",
        summary.records,
        summary.skipped,
        summary.outputs.len()
    );

    *lock(&state.etl)? = Some(summary);
    Ok(())
}

pub async fn validate_output(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let shard = results::shard_path(&cfg.processed_dir, VIEWERSHIP_SUMMARY);
    if !shard.is_file() {
        bail!("falta la salida del ETL: {}", shard.display());
    }

    let size = fs::metadata(&shard)?.len();
    let empty_run = lock(&state.etl)?
        .as_ref()
        .map(|etl| etl.records == 0)
        .unwrap_or(false);

    if size == 0 && !(empty_run && cfg.allow_empty_input) {
        bail!("la salida del ETL está vacía: {}", shard.display());
    }

    info!("salida validada: {} ({} bytes)", shard.display(), size);
    Ok(())
}

pub async fn run_sql_analytics(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let rows = summary_rows_for(&cfg, &state)?;
    let summary = analyze_rows(&cfg, &rows)?;

    for (i, show) in summary.top_shows.iter().take(3).enumerate() {
        info!(
            "  #{} {}: {:.2} hrs, {} views",
            i + 1,
            show.show_id,
            show.totals.total_hours,
            show.totals.total_views
        );
    }

    *lock(&state.analytics)? = Some(summary);
    Ok(())
}

pub async fn generate_report(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let rows = summary_rows_for(&cfg, &state)?;
    let path = report_rows(&cfg, &rows)?;

    info!("reporte escrito en {}", path.display());
    *lock(&state.report_path)? = Some(path);
    Ok(())
}

/// Simulada: sólo deja constancia en el log.
pub async fn send_notification(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<()> {
    let records = lock(&state.etl)?.as_ref().map(|e| e.records).unwrap_or(0);
    let report = lock(&state.report_path)?
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    info!(
        "notificación a {}: pipeline {} completo, {} registros procesados, reporte en {}",
        cfg.notify_recipient, cfg.dag.dag_id, records, report
    );
    Ok(())
}

/* --------- Reintentos y armado del DAG --------- */

/// Corre `f` hasta `attempts` veces; devuelve el último error si ninguna anda.
pub async fn with_retries<F, Fut>(stage: &str, attempts: u32, mut f: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    "etapa {} falló (intento {}/{}): {:#}; reintentando",
                    stage, attempt, attempts, e
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn stage_task<F, Fut>(
    id: &'static str,
    deps: &[&'static str],
    cfg: &Arc<PipelineConfig>,
    state: &PipelineState,
    stage: F,
) -> Task
where
    F: Fn(Arc<PipelineConfig>, PipelineState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let cfg = Arc::clone(cfg);
    let state = state.clone();
    let attempts = cfg.task_attempts;

    Task::new(id, move || async move {
        with_retries(id, attempts, || stage(Arc::clone(&cfg), state.clone())).await
    })
    .with_dependencies(deps.iter().copied())
}

/// Las seis etapas en orden, cada una dependiendo de la anterior.
pub fn build_dag(cfg: Arc<PipelineConfig>, state: PipelineState) -> Result<Dag> {
    let mut dag = Dag::new(cfg.dag.dag_id.clone());

    dag.add_task(stage_task(CHECK_RAW_DATA, &[], &cfg, &state, check_raw_data))?;
    dag.add_task(stage_task(RUN_ETL_PIPELINE, &[CHECK_RAW_DATA], &cfg, &state, run_etl_pipeline))?;
    dag.add_task(stage_task(VALIDATE_OUTPUT, &[RUN_ETL_PIPELINE], &cfg, &state, validate_output))?;
    dag.add_task(stage_task(RUN_SQL_ANALYTICS, &[VALIDATE_OUTPUT], &cfg, &state, run_sql_analytics))?;
    dag.add_task(stage_task(GENERATE_REPORT, &[RUN_SQL_ANALYTICS], &cfg, &state, generate_report))?;
    dag.add_task(stage_task(SEND_NOTIFICATION, &[GENERATE_REPORT], &cfg, &state, send_notification))?;

    Ok(dag)
}

/// Arma y corre el DAG completo.
pub async fn run_pipeline(cfg: PipelineConfig) -> Result<DagReport> {
    info!(
        "DAG {} (schedule \"{}\", desde {}, catchup={})",
        cfg.dag.dag_id, cfg.dag.schedule, cfg.dag.start_date, cfg.dag.catchup
    );

    let dag = build_dag(Arc::new(cfg), PipelineState::new())?;
    let report = dag.run().await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use common::TaskStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("pipeline_stage_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn config_for(base: &Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::from_lookup(|_| None);
        cfg.raw_candidates = vec![base.join("view_log_*.csv").to_string_lossy().to_string()];
        cfg.processed_dir = base.join("processed");
        cfg.chunk_size = 2;
        cfg
    }

    const SAMPLE: &str = "\
user_id,show_id,duration_minutes,device_type,view_date,genre
U1,S1,30,TV,2025-12-20,Drama
U2,S1,60,Mobile,2025-12-20,Drama
U1,S2,45,TV,2025-12-21,Comedy
U3,S1,15.9,Tablet,2025-12-21,Drama
U4,S2,abc,TV,2025-12-21,Comedy
";

    #[tokio::test]
    async fn pipeline_completo_termina_ok() {
        let base = temp_dir("full");
        fs::write(base.join("view_log_2025-12-21.csv"), SAMPLE).unwrap();
        let cfg = config_for(&base);
        let processed = cfg.processed_dir.clone();

        let report = run_pipeline(cfg).await.unwrap();

        assert!(report.success, "{report:?}");
        assert_eq!(report.tasks.len(), 6);
        assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Success));

        let rows = results::load_dimension(&processed, VIEWERSHIP_SUMMARY).unwrap();
        // (S1,20), (S1,21), (S2,21): la fila "abc" se descarta
        assert_eq!(rows.len(), 3);

        let total: u64 = rows.iter().map(|r| r.metrics.total_watch_time).sum();
        assert_eq!(total, 30 + 60 + 45 + 15);

        assert!(processed.join("analytics.json").is_file());
        let text = fs::read_to_string(processed.join("analysis_report.txt")).unwrap();
        assert!(text.contains("Active Shows: 2"));

        for dim in standard_dimensions().keys() {
            assert!(results::shard_path(&processed, dim).is_file(), "falta {dim}");
        }
    }

    #[tokio::test]
    async fn sin_archivo_crudo_falla_la_primera_y_salta_el_resto() {
        let base = temp_dir("missing");
        let report = run_pipeline(config_for(&base)).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.status_of(CHECK_RAW_DATA), Some(TaskStatus::Failed));
        for id in [
            RUN_ETL_PIPELINE,
            VALIDATE_OUTPUT,
            RUN_SQL_ANALYTICS,
            GENERATE_REPORT,
            SEND_NOTIFICATION,
        ] {
            assert_eq!(report.status_of(id), Some(TaskStatus::Skipped), "{id}");
        }

        let failed = report.failed_task().unwrap();
        assert!(failed.detail.as_deref().unwrap().contains("no se encontró"));
    }

    #[tokio::test]
    async fn entrada_vacia_falla_el_etl_por_defecto() {
        let base = temp_dir("empty_strict");
        fs::write(
            base.join("view_log_empty.csv"),
            "user_id,show_id,duration_minutes,device_type,view_date\n",
        )
        .unwrap();

        let report = run_pipeline(config_for(&base)).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.status_of(CHECK_RAW_DATA), Some(TaskStatus::Success));
        assert_eq!(report.status_of(RUN_ETL_PIPELINE), Some(TaskStatus::Failed));
        assert_eq!(report.status_of(VALIDATE_OUTPUT), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn entrada_vacia_permitida_produce_salidas_vacias() {
        let base = temp_dir("empty_allowed");
        fs::write(
            base.join("view_log_empty.csv"),
            "user_id,show_id,duration_minutes,device_type,view_date\n",
        )
        .unwrap();
        let mut cfg = config_for(&base);
        cfg.allow_empty_input = true;
        let processed = cfg.processed_dir.clone();

        let report = run_pipeline(cfg).await.unwrap();

        assert!(report.success, "{report:?}");
        let text = fs::read_to_string(processed.join("analysis_report.txt")).unwrap();
        assert!(text.contains("Active Shows: 0"));
    }

    #[tokio::test]
    async fn aggregate_file_limpia_salidas_viejas() {
        let base = temp_dir("clean");
        let raw = base.join("view_log.csv");
        fs::write(&raw, SAMPLE).unwrap();
        let cfg = config_for(&base);

        let stale = cfg.processed_dir.join("summary").join("viejo.json");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "{}\n").unwrap();

        let summary = aggregate_file(&cfg, &raw).await.unwrap();

        assert!(!stale.exists());
        assert_eq!(summary.records, 4);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.groups["device_summary"], 3);
        assert_eq!(summary.groups["top_user"], 3);
        assert_eq!(summary.outputs.len(), 4);
    }

    #[tokio::test]
    async fn with_retries_reintenta_hasta_lograrlo() {
        let calls = AtomicU32::new(0);

        let res = with_retries("flaky", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    bail!("intento {n} falla");
                }
                Ok(())
            }
        })
        .await;

        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retries_devuelve_el_ultimo_error() {
        let calls = AtomicU32::new(0);

        let err = with_retries("roto", 2, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<(), _>(anyhow!("falla {n}")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "falla 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn build_dag_encadena_las_seis_etapas() {
        let cfg = Arc::new(PipelineConfig::from_lookup(|_| None));
        let dag = build_dag(cfg, PipelineState::new()).unwrap();

        let ids: Vec<&str> = dag.tasks().iter().map(|t| t.id()).collect();
        assert_eq!(
            ids,
            vec![
                CHECK_RAW_DATA,
                RUN_ETL_PIPELINE,
                VALIDATE_OUTPUT,
                RUN_SQL_ANALYTICS,
                GENERATE_REPORT,
                SEND_NOTIFICATION
            ]
        );
        assert!(dag.tasks()[0].dependencies().is_empty());
        assert_eq!(dag.tasks()[3].dependencies(), &[VALIDATE_OUTPUT.to_string()]);
    }
}
