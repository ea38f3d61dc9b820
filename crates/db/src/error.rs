use centella_core::job::JobStatus;
use centella_core::types::{RunId, TaskId};

/// Failures of [`JobRegistry`](crate::JobRegistry) operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job {0} already exists")]
    Duplicate(TaskId),

    #[error("Job {0} not found")]
    NotFound(TaskId),

    #[error("Job {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {task_id} has used all {attempts} attempts")]
    RetryBudgetExhausted { task_id: TaskId, attempts: i32 },

    #[error("Job {task_id} is already bound to run {run_id}")]
    RunAlreadyAssigned { task_id: TaskId, run_id: RunId },

    #[error("Stored job row is invalid: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
