mod config;
mod stages;
mod state;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::results;
use common::fanout::VIEWERSHIP_SUMMARY;
use common::DagReport;

use crate::config::PipelineConfig;

const DEFAULT_LOG_FILTER: &str = "pipeline=info,common=info";

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Pipeline de analítica OTT: agregación por dimensiones + DAG de etapas")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Corre el DAG completo (check → ETL → validación → analytics → reporte → aviso)
    Run {
        /// Ruta o patrón glob del CSV crudo; se puede repetir
        #[arg(long = "raw-file", value_name = "RUTA")]
        raw_files: Vec<String>,

        #[arg(long, value_name = "DIR")]
        processed_dir: Option<PathBuf>,

        /// No fallar si el CSV no tiene registros válidos
        #[arg(long)]
        allow_empty: bool,

        /// Imprime el reporte del run como JSON
        #[arg(long)]
        json: bool,
    },
    /// Sólo la etapa de ETL sobre un CSV
    Aggregate {
        #[arg(value_name = "CSV")]
        input: PathBuf,

        #[arg(long, value_name = "DIR")]
        processed_dir: Option<PathBuf>,
    },
    /// Rollups sobre el resumen ya escrito
    Analyze {
        #[arg(long, value_name = "DIR")]
        processed_dir: Option<PathBuf>,
    },
    /// Reporte de texto sobre el resumen ya escrito
    Report {
        #[arg(long, value_name = "DIR")]
        processed_dir: Option<PathBuf>,
    },
    /// Muestra la configuración efectiva
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut cfg = PipelineConfig::from_env();

    match cli.command {
        Commands::Run {
            raw_files,
            processed_dir,
            allow_empty,
            json,
        } => {
            if !raw_files.is_empty() {
                cfg.raw_candidates = raw_files;
            }
            if let Some(dir) = processed_dir {
                cfg.processed_dir = dir;
            }
            cfg.allow_empty_input |= allow_empty;

            let report = stages::run_pipeline(cfg).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status_table(&report);
            }

            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Aggregate {
            input,
            processed_dir,
        } => {
            if let Some(dir) = processed_dir {
                cfg.processed_dir = dir;
            }

            let summary = stages::aggregate_file(&cfg, &input).await?;

            println!("ETL completo:");
            println!("  registros:   {}", summary.records);
            println!("  descartados: {}", summary.skipped);
            for (dim, groups) in &summary.groups {
                println!("  {:20} {} grupos", dim, groups);
            }
            for path in &summary.outputs {
                println!("  -> {}", path.display());
            }
        }
        Commands::Analyze { processed_dir } => {
            if let Some(dir) = processed_dir {
                cfg.processed_dir = dir;
            }

            let rows = results::load_dimension(&cfg.processed_dir, VIEWERSHIP_SUMMARY)?;
            let summary = stages::analyze_rows(&cfg, &rows)?;

            println!("Top shows por minutos vistos:");
            for s in &summary.top_shows {
                println!(
                    "  {:8} {:>10} min {:>8.2} hrs {:>6} views {:>6} users",
                    s.show_id,
                    s.totals.total_minutes,
                    s.totals.total_hours,
                    s.totals.total_views,
                    s.totals.unique_users
                );
            }

            println!("Engagement diario:");
            for d in &summary.daily_engagement {
                println!(
                    "  {:10} {:>10} min {:>8.2} hrs {:>6} views",
                    d.view_date, d.totals.total_minutes, d.totals.total_hours, d.totals.total_views
                );
            }

            info!("analytics escritos en {}", cfg.analytics_path().display());
        }
        Commands::Report { processed_dir } => {
            if let Some(dir) = processed_dir {
                cfg.processed_dir = dir;
            }

            let rows = results::load_dimension(&cfg.processed_dir, VIEWERSHIP_SUMMARY)?;
            let path = stages::report_rows(&cfg, &rows)?;

            print!("{}", std::fs::read_to_string(&path)?);
            info!("reporte escrito en {}", path.display());
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn print_status_table(report: &DagReport) {
    println!("DAG {} (run {})", report.dag_id, report.run_id);
    println!("  {:20} {:8} {:>10}  DETALLE", "TAREA", "ESTADO", "DURACIÓN");

    for t in &report.tasks {
        let duration = t
            .duration_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:20} {:8} {:>10}  {}",
            t.id,
            t.status.as_str(),
            duration,
            t.detail.as_deref().unwrap_or("")
        );
    }

    if report.success {
        println!("Resultado: OK");
    } else {
        println!("Resultado: FALLÓ");
    }
}
