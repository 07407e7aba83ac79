use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, fmt::Write as _, fs, path::Path};

use crate::results::SummaryRow;

const RULE_WIDTH: usize = 80;

/// Totales del reporte.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTotals {
    pub total_watch_minutes: u64,
    pub active_shows: usize,
}

impl ReportTotals {
    pub fn total_watch_hours(&self) -> f64 {
        self.total_watch_minutes as f64 / 60.0
    }
}

pub fn report_totals(rows: &[SummaryRow]) -> ReportTotals {
    let shows: BTreeSet<&str> = rows.iter().filter_map(|r| r.key_str("show_id")).collect();

    ReportTotals {
        total_watch_minutes: rows.iter().map(|r| r.metrics.total_watch_time).sum(),
        active_shows: shows.len(),
    }
}

/// Las `n` filas con más minutos vistos (empates por show_id).
pub fn top_rows(rows: &[SummaryRow], n: usize) -> Vec<&SummaryRow> {
    let mut sorted: Vec<&SummaryRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        b.metrics
            .total_watch_time
            .cmp(&a.metrics.total_watch_time)
            .then_with(|| a.key_str("show_id").cmp(&b.key_str("show_id")))
    });
    sorted.truncate(n);
    sorted
}

/// Entero con separador de miles: 12345 -> "12,345".
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Una línea por show:
///   S201   |    120.5 hrs |  1,540 views |    98 users | Avg  13.4 min
pub fn format_show_line(row: &SummaryRow) -> String {
    let m = &row.metrics;
    format!(
        "{:6} | {:8.1} hrs | {:>6} views | {:>5} users | Avg {:5.1} min",
        row.key_str("show_id").unwrap_or("?"),
        m.total_watch_time as f64 / 60.0,
        group_thousands(m.total_views),
        group_thousands(m.unique_users),
        m.avg_duration
    )
}

/// Texto completo del reporte.
pub fn render_report(rows: &[SummaryRow], top_n: usize, generated_at: DateTime<Utc>) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let totals = report_totals(rows);
    let mut out = String::new();

    let _ = writeln!(out, "OTT ANALYTICS REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Generated: {}", generated_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "Total Watch Time: {:.1} hrs", totals.total_watch_hours());
    let _ = writeln!(out, "Active Shows: {}", totals.active_shows);
    let _ = writeln!(out);
    let _ = writeln!(out, "SHOW PERFORMANCE (top {top_n})");
    let _ = writeln!(out, "{rule}");

    for row in top_rows(rows, top_n) {
        let _ = writeln!(out, "{}", format_show_line(row));
    }

    out
}

pub fn write_report(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, text).with_context(|| format!("no se pudo escribir {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AggregateResult;
    use serde_json::json;

    fn row(show: &str, date: &str, minutes: u64, views: u64) -> SummaryRow {
        SummaryRow {
            key: vec![
                ("show_id".to_string(), json!(show)),
                ("view_date".to_string(), json!(date)),
            ],
            metrics: AggregateResult {
                total_watch_time: minutes,
                total_views: views,
                unique_users: views,
                avg_duration: minutes as f64 / views as f64,
            },
            processed_ts: None,
        }
    }

    #[test]
    fn totales_cuentan_shows_distintos() {
        let rows = vec![
            row("S1", "2025-12-20", 60, 2),
            row("S1", "2025-12-21", 30, 1),
            row("S2", "2025-12-20", 90, 3),
        ];
        let t = report_totals(&rows);
        assert_eq!(t.total_watch_minutes, 180);
        assert_eq!(t.total_watch_hours(), 3.0);
        assert_eq!(t.active_shows, 2);
    }

    #[test]
    fn top_rows_ordena_por_minutos() {
        let rows = vec![
            row("S1", "2025-12-20", 10, 1),
            row("S2", "2025-12-20", 300, 3),
            row("S3", "2025-12-20", 50, 1),
        ];
        let top: Vec<&str> = top_rows(&rows, 2)
            .iter()
            .filter_map(|r| r.key_str("show_id"))
            .collect();
        assert_eq!(top, vec!["S2", "S3"]);
    }

    #[test]
    fn linea_de_show_tiene_formato_fijo() {
        let line = format_show_line(&row("S201", "2025-12-20", 90, 3));
        assert_eq!(
            line,
            "S201   |      1.5 hrs |      3 views |     3 users | Avg  30.0 min"
        );
    }

    #[test]
    fn separador_de_miles() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn vistas_y_usuarios_grandes_llevan_comas() {
        let mut r = row("S201", "2025-12-20", 60, 12345);
        r.metrics.unique_users = 2048;

        let line = format_show_line(&r);
        assert!(line.contains("| 12,345 views |"), "{line}");
        assert!(line.contains("| 2,048 users |"), "{line}");
    }

    #[test]
    fn reporte_incluye_encabezado_y_totales() {
        let rows = vec![row("S1", "2025-12-20", 90, 3), row("S2", "2025-12-20", 30, 1)];
        let text = render_report(&rows, 10, Utc::now());

        assert!(text.starts_with("OTT ANALYTICS REPORT\n"));
        assert!(text.contains("Total Watch Time: 2.0 hrs"));
        assert!(text.contains("Active Shows: 2"));
        assert!(text.contains("S1     |"));
    }

    #[test]
    fn write_report_crea_carpetas() {
        let tmp = std::env::temp_dir().join("report_tests").join("nested");
        let _ = fs::remove_dir_all(&tmp);
        let path = tmp.join("analysis_report.txt");

        write_report(&path, "hola\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hola\n");
    }
}
