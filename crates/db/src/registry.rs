//! The job registry contract shared by the Postgres and in-memory stores.

use async_trait::async_trait;
use centella_core::job::{EnrichmentStatus, JobStatus};

use crate::error::RegistryError;
use crate::models::job::{Job, NewJob};

/// Persistent store of job identity and status.
///
/// Every mutation is a single conditional write keyed by `task_id`, so a
/// status poll racing a worker's completion write never observes or causes
/// a lost update.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Insert a `queued` job. Fails with [`RegistryError::Duplicate`] if the
    /// task id was ever used before.
    async fn create_job(&self, new: &NewJob) -> Result<Job, RegistryError>;

    async fn get_job(&self, task_id: &str) -> Result<Job, RegistryError>;

    /// Bind `run_id` to the job. Idempotent for the same run id; any other
    /// run id fails with [`RegistryError::RunAlreadyAssigned`].
    async fn assign_run_id(&self, task_id: &str, run_id: &str) -> Result<Job, RegistryError>;

    /// Move the job to `status` if the state machine allows it.
    ///
    /// Entering `processing` increments `attempt_count`; re-entering it is
    /// refused once the budget is spent. Entering `completed` clears the
    /// error message; otherwise `error_message`, when given, replaces it.
    async fn update_status(
        &self,
        task_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, RegistryError>;

    /// Record the outcome of result enrichment. Does not touch `status`.
    async fn record_enrichment(
        &self,
        task_id: &str,
        enrichment: EnrichmentStatus,
    ) -> Result<Job, RegistryError>;

    /// Jobs of a project, newest first.
    async fn list_jobs_by_project(&self, project_id: &str) -> Result<Vec<Job>, RegistryError>;
}

/// Explain why a conditional status update matched no row, given the job's
/// current state.
pub(crate) fn rejected_transition(current: &Job, to: JobStatus) -> RegistryError {
    if current.status == JobStatus::Processing
        && to == JobStatus::Processing
        && !current.has_attempts_left()
    {
        RegistryError::RetryBudgetExhausted {
            task_id: current.task_id.clone(),
            attempts: current.attempt_count,
        }
    } else {
        RegistryError::InvalidTransition {
            task_id: current.task_id.clone(),
            from: current.status,
            to,
        }
    }
}
