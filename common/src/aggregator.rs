use std::collections::HashMap;

use tracing::{debug, warn};

use crate::accumulator::AggregateFunction;
use crate::error::AggregateError;
use crate::record::{GroupKey, KeySelector};

/// Resultado agregado de una dimensión: clave de grupo → resultado final.
/// El orden de los grupos no está especificado.
pub type GroupedResults<O> = HashMap<GroupKey, O>;

/// Acumuladores parciales de una partición (chunk) de la entrada.
pub type PartialAggregates<A> = HashMap<GroupKey, A>;

/// Tamaño de chunk por defecto para el fold local.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Pliega una partición de la entrada: un acumulador por clave,
/// creado al ver el primer registro del grupo.
pub fn fold_partition<T, K, F>(chunk: &[T], key: &K, func: &F) -> PartialAggregates<F::Acc>
where
    K: KeySelector<T> + ?Sized,
    F: AggregateFunction<T>,
{
    let mut acc: PartialAggregates<F::Acc> = HashMap::new();

    for item in chunk {
        let slot = acc
            .entry(key.key(item))
            .or_insert_with(|| func.create_accumulator());
        func.add(slot, item);
    }

    acc
}

/// Combina los parciales de todas las particiones, clave por clave.
/// Un solo dueño del mapa final: no hay escritores concurrentes.
pub fn merge_partitions<T, F, I>(func: &F, partials: I) -> PartialAggregates<F::Acc>
where
    F: AggregateFunction<T>,
    I: IntoIterator<Item = PartialAggregates<F::Acc>>,
{
    let mut final_acc: PartialAggregates<F::Acc> = HashMap::new();

    for part in partials {
        for (k, v) in part {
            match final_acc.get_mut(&k) {
                Some(existing) => func.merge(existing, v),
                None => {
                    final_acc.insert(k, v);
                }
            }
        }
    }

    final_acc
}

/// `extract` de cada grupo. Si un grupo falla, falla todo el llamado.
pub fn finalize<T, F>(
    func: &F,
    merged: PartialAggregates<F::Acc>,
) -> Result<GroupedResults<F::Output>, AggregateError>
where
    F: AggregateFunction<T>,
{
    let mut out = HashMap::with_capacity(merged.len());

    for (k, acc) in merged {
        match func.extract(acc) {
            Ok(v) => {
                out.insert(k, v);
            }
            Err(e) => {
                warn!("no se pudo finalizar el grupo {:?}: {}", k, e);
                return Err(e);
            }
        }
    }

    Ok(out)
}

/// Agrupa `items` por `key` y reduce cada grupo con `func`:
///   1. parte la entrada en chunks de `chunk_size`,
///   2. fold local por chunk (`create` + `add`),
///   3. merge por clave entre chunks,
///   4. `extract` por grupo.
///
/// El resultado no depende de `chunk_size` ni del orden de la entrada.
/// `chunk_size == 0` procesa todo en un solo chunk.
pub fn aggregate_chunked<T, K, F>(
    items: &[T],
    key: &K,
    func: &F,
    chunk_size: usize,
) -> Result<GroupedResults<F::Output>, AggregateError>
where
    K: KeySelector<T> + ?Sized,
    F: AggregateFunction<T>,
{
    if items.is_empty() {
        return Ok(HashMap::new());
    }

    let size = if chunk_size == 0 { items.len() } else { chunk_size };

    let partials: Vec<PartialAggregates<F::Acc>> = items
        .chunks(size)
        .map(|chunk| fold_partition(chunk, key, func))
        .collect();

    debug!(
        "agregando {} registros en {} particiones",
        items.len(),
        partials.len()
    );

    let merged = merge_partitions::<T, F, _>(func, partials);
    finalize::<T, F>(func, merged)
}

/// Igual que [`aggregate_chunked`] con el tamaño de chunk por defecto.
pub fn aggregate<T, K, F>(
    items: &[T],
    key: &K,
    func: &F,
) -> Result<GroupedResults<F::Output>, AggregateError>
where
    K: KeySelector<T> + ?Sized,
    F: AggregateFunction<T>,
{
    aggregate_chunked(items, key, func, DEFAULT_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{AggregateResult, ViewMetrics};
    use crate::record::{rec, KeyValue, Projection, Record, RecordField};

    fn sample() -> Vec<Record> {
        let mut out = Vec::new();
        let shows = ["S201", "S202", "S203"];
        for i in 0..50u64 {
            out.push(rec(
                &format!("U{}", i % 7),
                shows[(i % 3) as usize],
                5 + (i * 13) % 170,
            ));
        }
        out
    }

    fn by_show() -> Projection {
        Projection::single(RecordField::ShowId)
    }

    fn text_key(s: &str) -> GroupKey {
        vec![KeyValue::Text(s.to_string())]
    }

    #[test]
    fn agrupa_por_show() {
        let input = vec![rec("U1", "S1", 10), rec("U2", "S1", 20), rec("U1", "S2", 30)];

        let out = aggregate(&input, &by_show(), &ViewMetrics).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(
            out[&text_key("S1")],
            AggregateResult {
                total_watch_time: 30,
                total_views: 2,
                unique_users: 2,
                avg_duration: 15.0,
            }
        );
        assert_eq!(out[&text_key("S2")].avg_duration, 30.0);
    }

    #[test]
    fn cada_registro_se_cuenta_una_sola_vez() {
        let input = sample();
        for chunk_size in [0, 1, 3, 7, 50, 1000] {
            let out = aggregate_chunked(&input, &by_show(), &ViewMetrics, chunk_size).unwrap();
            let views: u64 = out.values().map(|r| r.total_views).sum();
            assert_eq!(views, input.len() as u64, "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn resultado_no_depende_del_chunking_ni_del_orden() {
        let input = sample();
        let projection = Projection::new(vec![RecordField::ShowId, RecordField::UserId]);

        let whole = aggregate_chunked(&input, &projection, &ViewMetrics, 0).unwrap();

        let mut reversed = input.clone();
        reversed.reverse();

        for chunk_size in [1, 4, 9, 49] {
            let chunked = aggregate_chunked(&input, &projection, &ViewMetrics, chunk_size).unwrap();
            let rev = aggregate_chunked(&reversed, &projection, &ViewMetrics, chunk_size).unwrap();
            assert_eq!(whole, chunked);
            assert_eq!(whole, rev);
        }
    }

    #[test]
    fn merge_de_corridas_parciales_igual_a_corrida_completa() {
        let input = sample();
        let projection = by_show();

        // cada mitad por separado, y luego merge de los parciales
        let (left, right) = input.split_at(17);
        let p1 = fold_partition(left, &projection, &ViewMetrics);
        let p2 = fold_partition(right, &projection, &ViewMetrics);
        let merged = merge_partitions::<Record, _, _>(&ViewMetrics, vec![p2, p1]);
        let split = finalize::<Record, _>(&ViewMetrics, merged).unwrap();

        let direct = aggregate(&input, &projection, &ViewMetrics).unwrap();
        assert_eq!(split, direct);
    }

    #[test]
    fn entrada_vacia_da_mapa_vacio() {
        let input: Vec<Record> = Vec::new();
        let out = aggregate(&input, &by_show(), &ViewMetrics).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unique_users_menor_o_igual_que_views_en_todo_grupo() {
        let input = sample();
        let out = aggregate(&input, &Projection::single(RecordField::ViewDate), &ViewMetrics).unwrap();
        for r in out.values() {
            assert!(r.unique_users <= r.total_views);
        }
    }

    #[test]
    fn finalize_propaga_undefined_average() {
        let mut partial = PartialAggregates::new();
        partial.insert(text_key("S9"), ViewMetrics.create_accumulator());

        let res = finalize::<Record, _>(&ViewMetrics, partial);
        assert!(matches!(res, Err(AggregateError::UndefinedAverage)));
    }
}
