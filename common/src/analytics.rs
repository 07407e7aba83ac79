use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

use crate::accumulator::{round2, AggregateFunction};
use crate::aggregator::aggregate;
use crate::error::AggregateError;
use crate::record::{GroupKey, KeyValue};
use crate::results::SummaryRow;

/// Suma de métricas de filas resumen (un `SUM(...) GROUP BY` en SQL).
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupSum;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupAcc {
    pub minutes: u64,
    pub views: u64,
    pub users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupTotals {
    pub total_minutes: u64,
    pub total_hours: f64,
    pub total_views: u64,
    /// Suma de usuarios únicos por fila: puede contar dos veces a un usuario
    /// que aparece en varias filas.
    pub unique_users: u64,
}

impl AggregateFunction<SummaryRow> for RollupSum {
    type Acc = RollupAcc;
    type Output = RollupTotals;

    fn create_accumulator(&self) -> RollupAcc {
        RollupAcc::default()
    }

    fn add(&self, acc: &mut RollupAcc, row: &SummaryRow) {
        acc.minutes = acc.minutes.saturating_add(row.metrics.total_watch_time);
        acc.views = acc.views.saturating_add(row.metrics.total_views);
        acc.users = acc.users.saturating_add(row.metrics.unique_users);
    }

    fn merge(&self, acc: &mut RollupAcc, other: RollupAcc) {
        acc.minutes = acc.minutes.saturating_add(other.minutes);
        acc.views = acc.views.saturating_add(other.views);
        acc.users = acc.users.saturating_add(other.users);
    }

    fn extract(&self, acc: RollupAcc) -> Result<RollupTotals, AggregateError> {
        Ok(RollupTotals {
            total_minutes: acc.minutes,
            total_hours: round2(acc.minutes as f64 / 60.0),
            total_views: acc.views,
            unique_users: acc.users,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowRollup {
    pub show_id: String,
    #[serde(flatten)]
    pub totals: RollupTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub view_date: String,
    #[serde(flatten)]
    pub totals: RollupTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub top_shows: Vec<ShowRollup>,
    pub daily_engagement: Vec<DailyRollup>,
}

fn column_key(column: &'static str) -> impl Fn(&SummaryRow) -> GroupKey + Send + Sync {
    move |row: &SummaryRow| vec![KeyValue::Text(row.key_str(column).unwrap_or("").to_string())]
}

fn key_text(key: &GroupKey) -> String {
    key.first().map(|k| k.to_string()).unwrap_or_default()
}

/// "Top Shows by Watch Time": minutos desc (show_id asc en empates), primeros `n`.
pub fn top_shows_by_watch_time(rows: &[SummaryRow], n: usize) -> Result<Vec<ShowRollup>> {
    let groups = aggregate(rows, &column_key("show_id"), &RollupSum)?;

    let mut out: Vec<ShowRollup> = groups
        .into_iter()
        .map(|(k, totals)| ShowRollup {
            show_id: key_text(&k),
            totals,
        })
        .collect();

    out.sort_by(|a, b| {
        b.totals
            .total_minutes
            .cmp(&a.totals.total_minutes)
            .then_with(|| a.show_id.cmp(&b.show_id))
    });
    out.truncate(n);
    Ok(out)
}

/// "Daily Engagement": una fila por fecha, la más reciente primero.
pub fn daily_engagement(rows: &[SummaryRow]) -> Result<Vec<DailyRollup>> {
    let groups = aggregate(rows, &column_key("view_date"), &RollupSum)?;

    let mut out: Vec<DailyRollup> = groups
        .into_iter()
        .map(|(k, totals)| DailyRollup {
            view_date: key_text(&k),
            totals,
        })
        .collect();

    out.sort_by(|a, b| b.view_date.cmp(&a.view_date));
    Ok(out)
}

pub fn run_analytics(rows: &[SummaryRow], top_n: usize) -> Result<AnalyticsSummary> {
    let summary = AnalyticsSummary {
        top_shows: top_shows_by_watch_time(rows, top_n)?,
        daily_engagement: daily_engagement(rows)?,
    };

    info!(
        "analytics: {} shows en el top, {} días",
        summary.top_shows.len(),
        summary.daily_engagement.len()
    );
    Ok(summary)
}

pub fn write_analytics(path: &Path, summary: &AnalyticsSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let text = serde_json::to_string_pretty(summary)?;
    fs::write(path, text).with_context(|| format!("no se pudo escribir {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AggregateResult;
    use serde_json::json;

    fn row(show: &str, date: &str, minutes: u64, views: u64, users: u64) -> SummaryRow {
        SummaryRow {
            key: vec![
                ("show_id".to_string(), json!(show)),
                ("view_date".to_string(), json!(date)),
            ],
            metrics: AggregateResult {
                total_watch_time: minutes,
                total_views: views,
                unique_users: users,
                avg_duration: round2(minutes as f64 / views as f64),
            },
            processed_ts: None,
        }
    }

    fn sample() -> Vec<SummaryRow> {
        vec![
            row("S1", "2025-12-20", 120, 4, 3),
            row("S1", "2025-12-21", 60, 2, 2),
            row("S2", "2025-12-20", 200, 5, 5),
            row("S3", "2025-12-21", 180, 3, 1),
        ]
    }

    #[test]
    fn top_shows_suma_por_show_y_ordena_desc() {
        let top = top_shows_by_watch_time(&sample(), 10).unwrap();

        let ids: Vec<&str> = top.iter().map(|s| s.show_id.as_str()).collect();
        // S2=200, S1=180, S3=180 -> empate S1/S3 por show_id
        assert_eq!(ids, vec!["S2", "S1", "S3"]);

        let s1 = &top[1].totals;
        assert_eq!(s1.total_minutes, 180);
        assert_eq!(s1.total_hours, 3.0);
        assert_eq!(s1.total_views, 6);
        assert_eq!(s1.unique_users, 5);
    }

    #[test]
    fn top_shows_respeta_el_limite() {
        let top = top_shows_by_watch_time(&sample(), 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].show_id, "S2");
    }

    #[test]
    fn daily_engagement_por_fecha_desc() {
        let days = daily_engagement(&sample()).unwrap();

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].view_date, "2025-12-21");
        assert_eq!(days[0].totals.total_minutes, 240);
        assert_eq!(days[0].totals.total_hours, 4.0);
        assert_eq!(days[1].totals.total_views, 9);
    }

    #[test]
    fn horas_redondeadas_a_dos_decimales() {
        let days = daily_engagement(&[row("S1", "2025-12-20", 100, 1, 1)]).unwrap();
        assert_eq!(days[0].totals.total_hours, 1.67);
    }

    #[test]
    fn analytics_se_escribe_como_json() {
        let tmp = std::env::temp_dir().join("analytics_tests");
        let _ = fs::remove_dir_all(&tmp);
        let path = tmp.join("analytics.json");

        let summary = run_analytics(&sample(), 10).unwrap();
        write_analytics(&path, &summary).unwrap();

        let back: AnalyticsSummary =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, summary);

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["top_shows"][0]["show_id"], "S2");
        assert_eq!(v["top_shows"][0]["total_minutes"], 200);
    }
}
