//! Submission and status queries.
//!
//! This is the surface an HTTP layer would call. It validates requests,
//! checks project prerequisites, registers the job and routes it.

use std::path::PathBuf;
use std::sync::Arc;

use centella_core::error::CoreError;
use centella_core::job::{EnrichmentStatus, JobStatus, JobType};
use centella_core::naming::{new_task_id, validate_identifier};
use centella_core::project::{create_project, ProjectLayout};
use centella_core::request::JobRequest;
use centella_core::retry::RetryPolicy;
use centella_core::types::{ProjectId, RunId, TaskId};
use centella_db::{Job, JobRegistry, NewJob, RegistryError};
use serde::Serialize;

use crate::queue::QueueError;
use crate::router::TaskRouter;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Job {0} already exists")]
    Duplicate(TaskId),

    #[error("Job {0} not found")]
    JobNotFound(TaskId),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for SubmitError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Duplicate(id) => SubmitError::Duplicate(id),
            RegistryError::NotFound(id) => SubmitError::JobNotFound(id),
            other => SubmitError::Registry(other),
        }
    }
}

impl From<CoreError> for SubmitError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => SubmitError::Validation(msg),
            CoreError::NotFound { id, .. } => SubmitError::ProjectNotFound(id),
            other => SubmitError::Internal(other.to_string()),
        }
    }
}

/// Last durably recorded state of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub task_id: TaskId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub run_id: Option<RunId>,
    pub error_message: Option<String>,
    pub enrichment_status: Option<EnrichmentStatus>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        Self {
            task_id: job.task_id,
            job_type: job.job_type,
            status: job.status,
            run_id: job.run_id,
            error_message: job.error_message,
            enrichment_status: job.enrichment_status,
        }
    }
}

pub struct JobService {
    registry: Arc<dyn JobRegistry>,
    router: TaskRouter,
    projects_root: PathBuf,
    retry: RetryPolicy,
}

impl JobService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        router: TaskRouter,
        projects_root: PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            router,
            projects_root,
            retry,
        }
    }

    /// Create a project directory skeleton and return its id.
    pub fn create_project(&self) -> Result<ProjectId, SubmitError> {
        let layout = create_project(&self.projects_root)?;
        tracing::info!(project_id = layout.project_id(), "Project created");
        Ok(layout.project_id().to_string())
    }

    /// Store `contents` as the project's training data.
    pub fn upload_training_data(&self, project_id: &str, contents: &[u8]) -> Result<(), SubmitError> {
        let layout = self.existing_project(project_id)?;
        layout.save_training_data(contents)?;
        tracing::info!(project_id, bytes = contents.len(), "Training data uploaded");
        Ok(())
    }

    /// Submit a job under a fresh task id.
    pub async fn submit_job(&self, project_id: &str, request: JobRequest) -> Result<TaskId, SubmitError> {
        let task_id = new_task_id();
        self.submit_job_with_id(&task_id, project_id, request).await?;
        Ok(task_id)
    }

    /// Submit a job under a caller-chosen task id. A task id can only ever
    /// be used once.
    pub async fn submit_job_with_id(
        &self,
        task_id: &str,
        project_id: &str,
        request: JobRequest,
    ) -> Result<(), SubmitError> {
        validate_identifier("task_id", task_id)?;
        request.validate()?;
        let layout = self.existing_project(project_id)?;
        check_prerequisites(&layout, request.job_type())?;

        let policy = RetryPolicy::for_job_type(request.job_type(), &self.retry);
        let new = NewJob::new(task_id, project_id, request.job_type()).with_max_attempts(policy.max_attempts);
        self.registry.create_job(&new).await?;

        if let Err(e) = self.router.enqueue(task_id, project_id, &request).await {
            // The job row exists but will never be delivered; close it out.
            let message = format!("Failed to enqueue task: {e}");
            tracing::error!(task_id, error = %e, "Enqueue failed");
            self.registry
                .update_status(task_id, JobStatus::Processing, None)
                .await?;
            self.registry
                .update_status(task_id, JobStatus::Failed, Some(&message))
                .await?;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get_job_status(&self, task_id: &str) -> Result<JobStatusView, SubmitError> {
        Ok(self.registry.get_job(task_id).await?.into())
    }

    /// A project's jobs, newest first.
    pub async fn list_project_runs(&self, project_id: &str) -> Result<Vec<Job>, SubmitError> {
        validate_identifier("project_id", project_id)?;
        Ok(self.registry.list_jobs_by_project(project_id).await?)
    }

    fn existing_project(&self, project_id: &str) -> Result<ProjectLayout, SubmitError> {
        let layout = ProjectLayout::new(&self.projects_root, project_id)?;
        if !layout.dir().is_dir() {
            return Err(SubmitError::ProjectNotFound(project_id.to_string()));
        }
        Ok(layout)
    }
}

/// Inputs a job type needs before it can run.
fn check_prerequisites(layout: &ProjectLayout, job_type: JobType) -> Result<(), SubmitError> {
    let required = match job_type {
        JobType::Train => Some(("training data", layout.training_data())),
        JobType::Generate | JobType::Reinforce => Some(("trained agent model", layout.agent_model())),
        JobType::Design => None,
    };
    match required {
        Some((what, path)) if !path.is_file() => Err(SubmitError::MissingPrerequisite(format!(
            "project {} has no {what}; expected {}",
            layout.project_id(),
            relative_to_project(layout, &path)
        ))),
        _ => Ok(()),
    }
}

fn relative_to_project(layout: &ProjectLayout, path: &std::path::Path) -> String {
    path.strip_prefix(layout.dir())
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
