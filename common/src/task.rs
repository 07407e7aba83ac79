use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, pin::Pin};

use crate::error::TaskError;

pub type TaskId = String;

/// Futuro que devuelve la acción de una tarea.
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Operación sin argumentos que reporta éxito o falla. Se ejecuta a lo sumo una vez.
pub type TaskAction = Box<dyn FnOnce() -> ActionFuture + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Sólo hacia adelante:
    ///   pending → running → success | failed
    ///   pending → skipped
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Una etapa del pipeline: id, dependencias declaradas, acción y estado.
pub struct Task {
    id: TaskId,
    dependencies: Vec<TaskId>,
    action: Option<TaskAction>,
    status: TaskStatus,

    /// Error de la acción (failed) o motivo del salto (skipped)
    detail: Option<String>,

    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new<F, Fut>(id: impl Into<TaskId>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action: TaskAction = Box::new(move || Box::pin(action()) as ActionFuture);

        Self {
            id: id.into(),
            dependencies: Vec::new(),
            action: Some(action),
            status: TaskStatus::Pending,
            detail: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Declara dependencias (en orden) por id.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn take_action(&mut self) -> Option<TaskAction> {
        self.action.take()
    }

    pub(crate) fn set_detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }

    /// Aplica una transición de estado; rechaza las que vuelven atrás.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                task: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Skipped => {
                self.finished_at = Some(now)
            }
            TaskStatus::Pending => {}
        }

        self.status = next;
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("status", &self.status)
            .field("detail", &self.detail)
            .finish_non_exhaustive()
    }
}
