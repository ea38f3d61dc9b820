//! Repository for the `jobs` table.
//!
//! Status changes are conditional `UPDATE`s whose `WHERE` clause encodes
//! the state machine, so concurrent writers can never regress a job.

use async_trait::async_trait;
use centella_core::job::{EnrichmentStatus, JobStatus, StatusId};
use sqlx::PgPool;

use crate::error::RegistryError;
use crate::models::job::{Job, JobRow, NewJob};
use crate::registry::{rejected_transition, JobRegistry};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    task_id, project_id, run_id, job_type, status_id, \
    attempt_count, max_attempts, error_message, enrichment_status, \
    created_at, updated_at";

/// Provides raw data access for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a queued job. Returns `None` if the task id already exists.
    pub async fn insert(pool: &PgPool, new: &NewJob) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (task_id, project_id, job_type, status_id, max_attempts) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (task_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(&new.task_id)
            .bind(&new.project_id)
            .bind(new.job_type.as_str())
            .bind(JobStatus::Queued.id())
            .bind(new.max_attempts)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_task_id(pool: &PgPool, task_id: &str) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE task_id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Set `run_id` if it is unset or already equal. Returns `None` when the
    /// job is missing or bound to a different run.
    pub async fn set_run_id(
        pool: &PgPool,
        task_id: &str,
        run_id: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET run_id = $2, updated_at = NOW() \
             WHERE task_id = $1 AND (run_id IS NULL OR run_id = $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(task_id)
            .bind(run_id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a status change if the current status is one of `from` and,
    /// for `processing`, the attempt budget is not spent.
    pub async fn transition(
        pool: &PgPool,
        task_id: &str,
        to: JobStatus,
        from: &[JobStatus],
        error_message: Option<&str>,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let from_ids: Vec<StatusId> = from.iter().map(|s| s.id()).collect();
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, \
                 attempt_count = CASE WHEN $2 = $5 THEN attempt_count + 1 ELSE attempt_count END, \
                 error_message = CASE WHEN $2 = $6 THEN NULL ELSE COALESCE($3, error_message) END, \
                 updated_at = NOW() \
             WHERE task_id = $1 \
               AND status_id = ANY($4) \
               AND ($2 <> $5 OR attempt_count < max_attempts) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(task_id)
            .bind(to.id())
            .bind(error_message)
            .bind(&from_ids)
            .bind(JobStatus::Processing.id())
            .bind(JobStatus::Completed.id())
            .fetch_optional(pool)
            .await
    }

    pub async fn set_enrichment(
        pool: &PgPool,
        task_id: &str,
        enrichment: EnrichmentStatus,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET enrichment_status = $2, updated_at = NOW() \
             WHERE task_id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(task_id)
            .bind(enrichment.as_str())
            .fetch_optional(pool)
            .await
    }

    /// List a project's jobs, newest first.
    pub async fn list_by_project(pool: &PgPool, project_id: &str) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE project_id = $1 \
             ORDER BY created_at DESC, task_id DESC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// PgJobRegistry
// ---------------------------------------------------------------------------

/// [`JobRegistry`] backed by the `jobs` table.
#[derive(Clone)]
pub struct PgJobRegistry {
    pool: PgPool,
}

impl PgJobRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn require(&self, task_id: &str) -> Result<Job, RegistryError> {
        JobRepo::find_by_task_id(&self.pool, task_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?
            .try_into()
    }
}

#[async_trait]
impl JobRegistry for PgJobRegistry {
    async fn create_job(&self, new: &NewJob) -> Result<Job, RegistryError> {
        let row = JobRepo::insert(&self.pool, new)
            .await?
            .ok_or_else(|| RegistryError::Duplicate(new.task_id.clone()))?;
        tracing::debug!(task_id = %new.task_id, job_type = %new.job_type, "Job created");
        row.try_into()
    }

    async fn get_job(&self, task_id: &str) -> Result<Job, RegistryError> {
        self.require(task_id).await
    }

    async fn assign_run_id(&self, task_id: &str, run_id: &str) -> Result<Job, RegistryError> {
        match JobRepo::set_run_id(&self.pool, task_id, run_id).await? {
            Some(row) => row.try_into(),
            None => {
                let current = self.require(task_id).await?;
                Err(RegistryError::RunAlreadyAssigned {
                    task_id: task_id.to_string(),
                    run_id: current.run_id.unwrap_or_default(),
                })
            }
        }
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, RegistryError> {
        let from = JobStatus::predecessors(status);
        match JobRepo::transition(&self.pool, task_id, status, from, error_message).await? {
            Some(row) => row.try_into(),
            None => {
                let current = self.require(task_id).await?;
                Err(rejected_transition(&current, status))
            }
        }
    }

    async fn record_enrichment(
        &self,
        task_id: &str,
        enrichment: EnrichmentStatus,
    ) -> Result<Job, RegistryError> {
        JobRepo::set_enrichment(&self.pool, task_id, enrichment)
            .await?
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?
            .try_into()
    }

    async fn list_jobs_by_project(&self, project_id: &str) -> Result<Vec<Job>, RegistryError> {
        JobRepo::list_by_project(&self.pool, project_id)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }
}
