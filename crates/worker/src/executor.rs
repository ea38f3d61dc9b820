//! Runs one delivered task to a terminal status.
//!
//! The executor is the only writer of a job's `processing`, `completed`
//! and `failed` statuses. It binds a run id on first dispatch, re-enters
//! `processing` for every attempt, and applies the retry policy to engine
//! failures.

use std::path::PathBuf;
use std::sync::Arc;

use centella_core::config::{synthesize, SynthesizedRun};
use centella_core::job::JobStatus;
use centella_core::naming::new_run_id;
use centella_core::project::ProjectLayout;
use centella_core::retry::{RetryDecision, RetryPolicy};
use centella_db::{Job, JobRegistry, RegistryError};
use centella_engine::EngineRunner;
use centella_pipeline::{CollectionOutcome, ResultCollector};
use tokio_util::sync::CancellationToken;

use crate::queue::TaskMessage;

/// Placeholder substituted for the projects root in stored error messages.
const PROJECTS_PLACEHOLDER: &str = "<projects>";

/// Stored error messages keep at most this many trailing characters.
const MAX_ERROR_CHARS: usize = 2000;

/// What happened to a delivered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed {
        run_id: String,
        enrichment: Option<CollectionOutcome>,
    },
    Failed {
        error: String,
    },
    /// Already terminal, unknown, or owned by another worker. Nothing done.
    Skipped,
    /// Shutdown arrived during a retry backoff. The task should be
    /// redelivered.
    Interrupted,
}

/// Errors that leave the task unfinished and call for redelivery.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct JobExecutor {
    registry: Arc<dyn JobRegistry>,
    runner: Arc<dyn EngineRunner>,
    collector: Arc<ResultCollector>,
    projects_root: PathBuf,
    prior_model: PathBuf,
    retry: RetryPolicy,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        runner: Arc<dyn EngineRunner>,
        collector: Arc<ResultCollector>,
        projects_root: PathBuf,
        prior_model: PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            runner,
            collector,
            projects_root,
            prior_model,
            retry,
        }
    }

    /// Process one delivery of `message`.
    ///
    /// Safe to call more than once for the same task: terminal jobs are
    /// skipped, and a job found in `processing` (a redelivery after a lost
    /// worker) resumes as a counted retry on its existing run.
    pub async fn process(
        &self,
        message: &TaskMessage,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ExecutorError> {
        let task_id = message.task_id.as_str();

        let job = match self.registry.get_job(task_id).await {
            Ok(job) => job,
            Err(RegistryError::NotFound(_)) => {
                tracing::error!(task_id, "Dropping task with no registered job");
                return Ok(TaskOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        if job.status.is_terminal() {
            tracing::info!(task_id, status = %job.status, "Job already finished, ignoring redelivery");
            return Ok(TaskOutcome::Skipped);
        }

        let run_id = match self.bind_run(&job).await? {
            Some(run_id) => run_id,
            None => return Ok(TaskOutcome::Skipped),
        };

        let policy = RetryPolicy::for_job_type(job.job_type, &self.retry);
        let mut last_error: Option<String> = job.error_message.clone();

        loop {
            let job = match self
                .registry
                .update_status(task_id, JobStatus::Processing, last_error.as_deref())
                .await
            {
                Ok(job) => job,
                Err(RegistryError::RetryBudgetExhausted { attempts, .. }) => {
                    let error = last_error.unwrap_or_else(|| {
                        format!("Worker lost during processing; {attempts} attempts used")
                    });
                    return self.fail(task_id, error).await;
                }
                Err(RegistryError::InvalidTransition { from, .. }) if from.is_terminal() => {
                    tracing::info!(task_id, status = %from, "Job finished elsewhere");
                    return Ok(TaskOutcome::Skipped);
                }
                Err(e) => return Err(e.into()),
            };
            let attempt = u32::try_from(job.attempt_count).unwrap_or(u32::MAX);

            let synthesized = match self.synthesize(message, &run_id) {
                Ok(s) => s,
                Err(error) => return self.fail(task_id, error).await,
            };

            tracing::info!(
                task_id,
                run_id = %run_id,
                job_type = %job.job_type,
                attempt,
                max_attempts = job.max_attempts,
                "Running engine",
            );
            match self
                .runner
                .execute(&synthesized.document, &synthesized.outputs)
                .await
            {
                Ok(result) => {
                    tracing::info!(
                        task_id,
                        run_id = %run_id,
                        duration_ms = result.duration_ms,
                        "Engine run succeeded",
                    );
                    return self.complete(task_id, run_id, &synthesized).await;
                }
                Err(e) => {
                    let class = e.classify();
                    let error = self.sanitize_error(&e.to_string());
                    match policy.decide(attempt, class) {
                        RetryDecision::Retry { delay } => {
                            tracing::warn!(
                                task_id,
                                attempt,
                                ?class,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Engine run failed, retrying",
                            );
                            last_error = Some(error);
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    tracing::info!(task_id, "Shutdown during retry backoff");
                                    return Ok(TaskOutcome::Interrupted);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(task_id, attempt, ?class, error = %error, "Engine run failed");
                            return self.fail(task_id, error).await;
                        }
                    }
                }
            }
        }
    }

    /// Reuse the job's run id or bind a fresh one. `None` if another worker
    /// bound a different run in the meantime.
    async fn bind_run(&self, job: &Job) -> Result<Option<String>, ExecutorError> {
        if let Some(run_id) = &job.run_id {
            return Ok(Some(run_id.clone()));
        }
        let run_id = new_run_id();
        match self.registry.assign_run_id(&job.task_id, &run_id).await {
            Ok(_) => Ok(Some(run_id)),
            Err(RegistryError::RunAlreadyAssigned { run_id: other, .. }) => {
                tracing::warn!(task_id = %job.task_id, run_id = %other, "Run bound by another worker");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn synthesize(&self, message: &TaskMessage, run_id: &str) -> Result<SynthesizedRun, String> {
        let layout = ProjectLayout::new(&self.projects_root, &message.project_id)
            .map_err(|e| e.to_string())?;
        synthesize(&message.request, &layout, run_id, &self.prior_model).map_err(|e| e.to_string())
    }

    async fn complete(
        &self,
        task_id: &str,
        run_id: String,
        synthesized: &SynthesizedRun,
    ) -> Result<TaskOutcome, ExecutorError> {
        let enrichment = match &synthesized.outputs.candidates {
            Some(candidates) => {
                let outcome = self.collector.collect(candidates).await;
                self.registry
                    .record_enrichment(task_id, outcome.enrichment_status())
                    .await?;
                Some(outcome)
            }
            None => None,
        };
        self.registry
            .update_status(task_id, JobStatus::Completed, None)
            .await?;
        tracing::info!(task_id, run_id = %run_id, "Job completed");
        Ok(TaskOutcome::Completed { run_id, enrichment })
    }

    async fn fail(&self, task_id: &str, error: String) -> Result<TaskOutcome, ExecutorError> {
        self.registry
            .update_status(task_id, JobStatus::Failed, Some(&error))
            .await?;
        tracing::error!(task_id, error = %error, "Job failed");
        Ok(TaskOutcome::Failed { error })
    }

    fn sanitize_error(&self, message: &str) -> String {
        sanitize_error(message, &self.projects_root.to_string_lossy())
    }
}

/// Hide the projects root and keep only the tail of long messages, where
/// engine stderr usually carries the actual cause.
pub fn sanitize_error(message: &str, projects_root: &str) -> String {
    let trimmed_root = projects_root.trim_end_matches('/');
    let replaced = if trimmed_root.is_empty() {
        message.to_string()
    } else {
        message.replace(trimmed_root, PROJECTS_PLACEHOLDER)
    };
    let count = replaced.chars().count();
    if count <= MAX_ERROR_CHARS {
        return replaced;
    }
    replaced.chars().skip(count - MAX_ERROR_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
