use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Errores del motor de agregación (aggregator + fan-out).
#[derive(Debug, Error)]
pub enum AggregateError {
    /// No llegó ningún registro. El llamador decide si eso es fatal.
    #[error("no hay registros de entrada para agregar")]
    EmptyInput,

    /// Se pidió `extract` sobre un grupo sin vistas. Indica un bug:
    /// los grupos sólo se crean al observar su primer registro.
    #[error("avg_duration indefinido: el grupo tiene total_views = 0")]
    UndefinedAverage,

    /// Una suma de minutos o de vistas no entra en `u64`.
    #[error("desborde al sumar métricas del grupo")]
    Overflow,

    /// Una dimensión del fan-out no terminó (panic, cancelación, etc).
    #[error("la dimensión {dimension} falló: {reason}")]
    DimensionFailed { dimension: String, reason: String },
}

/// Errores y señales del ejecutor de DAG.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("la tarea {task} falló: {detail}")]
    ActionFailure { task: TaskId, detail: String },

    /// Señal interna que produce `skipped`; nunca se devuelve como error al llamador.
    #[error("la tarea {task} no puede iniciar: la dependencia {dependency} está en {status}")]
    DependencyNotSatisfied {
        task: TaskId,
        dependency: TaskId,
        status: TaskStatus,
    },

    #[error("transición inválida en la tarea {task}: {from} -> {to}")]
    IllegalTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("tarea duplicada en el DAG: {0}")]
    DuplicateTask(TaskId),
}
