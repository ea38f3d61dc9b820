//! Job entity and the row shape it is loaded from.

use centella_core::job::{EnrichmentStatus, JobStatus, JobType, StatusId};
use centella_core::retry::DEFAULT_MAX_ATTEMPTS;
use centella_core::types::{ProjectId, RunId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::RegistryError;

/// A tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    /// Assigned on first dispatch; immutable afterwards.
    pub run_id: Option<RunId>,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Number of times the job has entered `processing`.
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub enrichment_status: Option<EnrichmentStatus>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Whether another `processing -> processing` re-entry fits the budget.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Input for [`JobRegistry::create_job`](crate::JobRegistry::create_job).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub job_type: JobType,
    pub max_attempts: i32,
}

impl NewJob {
    pub fn new(task_id: impl Into<TaskId>, project_id: impl Into<ProjectId>, job_type: JobType) -> Self {
        Self {
            task_id: task_id.into(),
            project_id: project_id.into(),
            job_type,
            max_attempts: DEFAULT_MAX_ATTEMPTS as i32,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = i32::try_from(max_attempts.max(1)).unwrap_or(i32::MAX);
        self
    }
}

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub task_id: String,
    pub project_id: String,
    pub run_id: Option<String>,
    pub job_type: String,
    pub status_id: StatusId,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub enrichment_status: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = RegistryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let invalid = |e: centella_core::error::CoreError| RegistryError::InvalidRow(e.to_string());
        Ok(Job {
            job_type: JobType::try_from(row.job_type).map_err(invalid)?,
            status: JobStatus::try_from(row.status_id).map_err(invalid)?,
            enrichment_status: row
                .enrichment_status
                .map(EnrichmentStatus::try_from)
                .transpose()
                .map_err(invalid)?,
            task_id: row.task_id,
            project_id: row.project_id,
            run_id: row.run_id,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn row() -> JobRow {
        let now = Utc::now();
        JobRow {
            task_id: "task_1".into(),
            project_id: "p1".into(),
            run_id: None,
            job_type: "generate".into(),
            status_id: 2,
            attempt_count: 1,
            max_attempts: 3,
            error_message: None,
            enrichment_status: Some("partial".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn converts_valid_row() {
        let job = Job::try_from(row()).unwrap();
        assert_eq!(job.job_type, JobType::Generate);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.enrichment_status, Some(EnrichmentStatus::Partial));
        assert!(job.has_attempts_left());
    }

    #[test]
    fn rejects_unknown_status_id() {
        let mut r = row();
        r.status_id = 9;
        assert_matches!(Job::try_from(r), Err(RegistryError::InvalidRow(_)));
    }

    #[test]
    fn new_job_clamps_budget() {
        let job = NewJob::new("t", "p", JobType::Train).with_max_attempts(0);
        assert_eq!(job.max_attempts, 1);
    }
}
