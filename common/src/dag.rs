use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::{Task, TaskId, TaskStatus};

/// Estado final de una tarea dentro del reporte de un run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Cadena de error (failed) o motivo del salto (skipped)
    pub detail: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Resultado de un run: booleano global + tabla de estados por tarea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagReport {
    pub dag_id: String,
    pub run_id: Uuid,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskReport>,
}

impl DagReport {
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == id).map(|t| t.status)
    }

    /// La tarea que rompió el run, si alguna falló.
    pub fn failed_task(&self) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Failed)
    }
}

/// Ejecutor secuencial y fail-fast sobre una lista de tareas ya ordenada
/// topológicamente por quien la arma. No reordena ni analiza el grafo.
#[derive(Debug)]
pub struct Dag {
    id: String,
    tasks: Vec<Task>,
}

impl Dag {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), TaskError> {
        if self.tasks.iter().any(|t| t.id() == task.id()) {
            return Err(TaskError::DuplicateTask(task.id().to_string()));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Primera dependencia que no está en `success` (o que no existe).
    fn unsatisfied_dependency(&self, idx: usize) -> Option<TaskError> {
        let task = &self.tasks[idx];

        for dep in task.dependencies() {
            let status = self
                .tasks
                .iter()
                .find(|t| t.id() == dep)
                .map(|t| t.status())
                .unwrap_or(TaskStatus::Pending);

            if status != TaskStatus::Success {
                return Some(TaskError::DependencyNotSatisfied {
                    task: task.id().to_string(),
                    dependency: dep.clone(),
                    status,
                });
            }
        }

        None
    }

    /// Corre las tareas en el orden declarado.
    ///
    /// Cada acción corre en su propia tarea de tokio y se espera hasta que
    /// termine antes de mirar las dependencias de la siguiente. La primera
    /// tarea `failed` o `skipped` detiene el run: las que quedan se marcan
    /// `skipped` (nunca intentadas). Los resultados de las tareas ya
    /// completadas quedan en el reporte.
    ///
    /// Sólo devuelve `Err` ante una transición de estado inválida.
    pub async fn run(mut self) -> Result<DagReport, TaskError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "iniciando DAG {} (run {}) con {} tareas",
            self.id,
            run_id,
            self.tasks.len()
        );

        let mut halted_after: Option<TaskId> = None;

        for idx in 0..self.tasks.len() {
            if let Some(after) = &halted_after {
                let task = &mut self.tasks[idx];
                task.set_detail(format!("no intentada: el DAG se detuvo en {after}"));
                task.transition(TaskStatus::Skipped)?;
                continue;
            }

            if let Some(reason) = self.unsatisfied_dependency(idx) {
                let task = &mut self.tasks[idx];
                warn!("saltando tarea {}: {}", task.id(), reason);
                task.set_detail(reason.to_string());
                task.transition(TaskStatus::Skipped)?;
                halted_after = Some(task.id().to_string());
                continue;
            }

            let task = &mut self.tasks[idx];
            info!("ejecutando tarea {}", task.id());
            task.transition(TaskStatus::Running)?;

            let outcome = match task.take_action() {
                Some(action) => match tokio::spawn(action()).await {
                    Ok(res) => res,
                    Err(e) => Err(anyhow!("panic o join error en la acción: {e}")),
                },
                None => Err(anyhow!("la tarea no tiene acción")),
            };

            match outcome {
                Ok(()) => {
                    task.transition(TaskStatus::Success)?;
                    info!("tarea {} completada", task.id());
                }
                Err(e) => {
                    let failure = TaskError::ActionFailure {
                        task: task.id().to_string(),
                        detail: format!("{e:#}"),
                    };
                    warn!("{}", failure);
                    task.set_detail(format!("{e:#}"));
                    task.transition(TaskStatus::Failed)?;
                    halted_after = Some(task.id().to_string());
                }
            }
        }

        let finished_at = Utc::now();
        let tasks: Vec<TaskReport> = self.tasks.iter().map(task_report).collect();
        let success = tasks.iter().all(|t| t.status == TaskStatus::Success);

        if success {
            info!("DAG {} completado correctamente", self.id);
        } else {
            warn!("DAG {} falló", self.id);
        }

        Ok(DagReport {
            dag_id: self.id,
            run_id,
            success,
            started_at,
            finished_at,
            tasks,
        })
    }
}

fn task_report(task: &Task) -> TaskReport {
    let duration_ms = match (task.started_at(), task.finished_at()) {
        (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0) as u64),
        _ => None,
    };

    TaskReport {
        id: task.id().to_string(),
        status: task.status(),
        detail: task.detail().map(str::to_string),
        duration_ms,
    }
}
