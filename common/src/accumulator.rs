use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AggregateError;
use crate::record::Record;

/// Función de agregación incremental estilo combine-fn:
/// `create_accumulator` → `add`* → `merge`* → `extract`.
///
/// `add` y `merge` tienen que ser asociativas y conmutativas: el resultado
/// final de un grupo no puede depender de cómo se partió la entrada ni del
/// orden en que se combinaron los parciales.
///
/// Agregar una forma nueva de agregado es implementar este trait; el
/// aggregator no cambia.
pub trait AggregateFunction<IN>: Send + Sync {
    /// Estado parcial por grupo.
    type Acc: Send;
    /// Resultado final por grupo.
    type Output: Send;

    /// Acumulador vacío para un grupo nuevo.
    fn create_accumulator(&self) -> Self::Acc;

    /// Pliega un elemento dentro del acumulador.
    fn add(&self, acc: &mut Self::Acc, input: &IN);

    /// Combina otro parcial del mismo grupo dentro de `acc`.
    fn merge(&self, acc: &mut Self::Acc, other: Self::Acc);

    /// Convierte el acumulador en el resultado final.
    fn extract(&self, acc: Self::Acc) -> Result<Self::Output, AggregateError>;

    /// Combina una lista de parciales del mismo grupo.
    fn merge_all<I>(&self, accs: I) -> Self::Acc
    where
        I: IntoIterator<Item = Self::Acc>,
    {
        let mut merged = self.create_accumulator();
        for acc in accs {
            self.merge(&mut merged, acc);
        }
        merged
    }
}

/// Estado intermedio de [`ViewMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsAccumulator {
    pub watch_minutes: u64,
    pub view_count: u64,
    pub distinct_users: BTreeSet<String>,
    /// Alguna suma se pasó de `u64`; `extract` lo reporta como error.
    pub overflowed: bool,
}

impl MetricsAccumulator {
    fn add_minutes(&mut self, minutes: u64) {
        match self.watch_minutes.checked_add(minutes) {
            Some(total) => self.watch_minutes = total,
            None => self.overflowed = true,
        }
    }

    fn add_views(&mut self, views: u64) {
        match self.view_count.checked_add(views) {
            Some(total) => self.view_count = total,
            None => self.overflowed = true,
        }
    }
}

/// Resumen final de un grupo. Los nombres de campo son parte del contrato
/// con los consumidores del JSON de salida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total_watch_time: u64,
    pub total_views: u64,
    pub unique_users: u64,
    pub avg_duration: f64,
}

/// Minutos vistos, vistas y usuarios distintos por grupo.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewMetrics;

impl AggregateFunction<Record> for ViewMetrics {
    type Acc = MetricsAccumulator;
    type Output = AggregateResult;

    fn create_accumulator(&self) -> MetricsAccumulator {
        MetricsAccumulator::default()
    }

    fn add(&self, acc: &mut MetricsAccumulator, input: &Record) {
        acc.add_minutes(input.duration_minutes);
        acc.add_views(1);
        acc.distinct_users.insert(input.user_id.clone());
    }

    fn merge(&self, acc: &mut MetricsAccumulator, other: MetricsAccumulator) {
        acc.overflowed |= other.overflowed;
        acc.add_minutes(other.watch_minutes);
        acc.add_views(other.view_count);
        acc.distinct_users.extend(other.distinct_users);
    }

    fn extract(&self, acc: MetricsAccumulator) -> Result<AggregateResult, AggregateError> {
        if acc.overflowed {
            return Err(AggregateError::Overflow);
        }
        if acc.view_count == 0 {
            return Err(AggregateError::UndefinedAverage);
        }

        Ok(AggregateResult {
            total_watch_time: acc.watch_minutes,
            total_views: acc.view_count,
            unique_users: acc.distinct_users.len() as u64,
            avg_duration: round2(acc.watch_minutes as f64 / acc.view_count as f64),
        })
    }
}

/// Redondeo a 2 decimales.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
