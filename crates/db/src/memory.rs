//! Process-local [`JobRegistry`] for tests and single-process deployments.
//!
//! All state sits behind one mutex, so each operation is atomic in the same
//! way the conditional SQL updates are.

use std::collections::HashMap;

use async_trait::async_trait;
use centella_core::job::{EnrichmentStatus, JobStatus};
use centella_core::types::TaskId;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::RegistryError;
use crate::models::job::{Job, NewJob};
use crate::registry::{rejected_transition, JobRegistry};

#[derive(Default)]
struct State {
    jobs: HashMap<TaskId, Job>,
    /// Creation order, oldest first.
    order: Vec<TaskId>,
}

#[derive(Default)]
pub struct MemoryJobRegistry {
    state: Mutex<State>,
}

impl MemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn create_job(&self, new: &NewJob) -> Result<Job, RegistryError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&new.task_id) {
            return Err(RegistryError::Duplicate(new.task_id.clone()));
        }
        let now = Utc::now();
        let job = Job {
            task_id: new.task_id.clone(),
            project_id: new.project_id.clone(),
            run_id: None,
            job_type: new.job_type,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: new.max_attempts,
            error_message: None,
            enrichment_status: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.task_id.clone(), job.clone());
        state.order.push(job.task_id.clone());
        Ok(job)
    }

    async fn get_job(&self, task_id: &str) -> Result<Job, RegistryError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(task_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))
    }

    async fn assign_run_id(&self, task_id: &str, run_id: &str) -> Result<Job, RegistryError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        match &job.run_id {
            Some(existing) if existing != run_id => Err(RegistryError::RunAlreadyAssigned {
                task_id: task_id.to_string(),
                run_id: existing.clone(),
            }),
            _ => {
                job.run_id = Some(run_id.to_string());
                job.updated_at = Utc::now();
                Ok(job.clone())
            }
        }
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, RegistryError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;

        let allowed = job.status.can_transition_to(status)
            && (status != JobStatus::Processing || job.has_attempts_left());
        if !allowed {
            return Err(rejected_transition(job, status));
        }

        job.status = status;
        if status == JobStatus::Processing {
            job.attempt_count += 1;
        }
        if status == JobStatus::Completed {
            job.error_message = None;
        } else if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn record_enrichment(
        &self,
        task_id: &str,
        enrichment: EnrichmentStatus,
    ) -> Result<Job, RegistryError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        job.enrichment_status = Some(enrichment);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn list_jobs_by_project(&self, project_id: &str) -> Result<Vec<Job>, RegistryError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.project_id == project_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use centella_core::job::JobType;

    use super::*;

    async fn registry_with(task_id: &str) -> MemoryJobRegistry {
        let registry = MemoryJobRegistry::new();
        registry
            .create_job(&NewJob::new(task_id, "p1", JobType::Generate))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn create_starts_queued() {
        let registry = registry_with("t1").await;
        let job = registry.get_job("t1").await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt_count, 0);
        assert!(job.run_id.is_none());
    }

    #[tokio::test]
    async fn duplicate_task_id_is_rejected() {
        let registry = registry_with("t1").await;
        let err = registry
            .create_job(&NewJob::new("t1", "p2", JobType::Train))
            .await
            .unwrap_err();
        assert_matches!(err, RegistryError::Duplicate(id) if id == "t1");

        // The original row is untouched.
        let job = registry.get_job("t1").await.unwrap();
        assert_eq!(job.project_id, "p1");
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let registry = MemoryJobRegistry::new();
        assert_matches!(
            registry.get_job("nope").await,
            Err(RegistryError::NotFound(_))
        );
        assert_matches!(
            registry.update_status("nope", JobStatus::Processing, None).await,
            Err(RegistryError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let registry = registry_with("t1").await;
        let job = registry
            .update_status("t1", JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(job.attempt_count, 1);
        let job = registry
            .update_status("t1", JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn terminal_states_accept_nothing() {
        let registry = registry_with("t1").await;
        registry.update_status("t1", JobStatus::Processing, None).await.unwrap();
        registry
            .update_status("t1", JobStatus::Failed, Some("boom"))
            .await
            .unwrap();

        for next in [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed] {
            assert_matches!(
                registry.update_status("t1", next, None).await,
                Err(RegistryError::InvalidTransition { from: JobStatus::Failed, .. })
            );
        }
        let job = registry.get_job("t1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn queued_cannot_complete_directly() {
        let registry = registry_with("t1").await;
        assert_matches!(
            registry.update_status("t1", JobStatus::Completed, None).await,
            Err(RegistryError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
                ..
            })
        );
    }

    #[tokio::test]
    async fn retry_reentry_is_budgeted() {
        let registry = registry_with("t1").await;
        for expected in 1..=3 {
            let job = registry
                .update_status("t1", JobStatus::Processing, Some("transient"))
                .await
                .unwrap();
            assert_eq!(job.attempt_count, expected);
        }
        assert_matches!(
            registry.update_status("t1", JobStatus::Processing, None).await,
            Err(RegistryError::RetryBudgetExhausted { attempts: 3, .. })
        );
        registry
            .update_status("t1", JobStatus::Failed, Some("last error"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn completion_clears_previous_attempt_error() {
        let registry = registry_with("t1").await;
        registry
            .update_status("t1", JobStatus::Processing, None)
            .await
            .unwrap();
        registry
            .update_status("t1", JobStatus::Processing, Some("attempt 1 failed"))
            .await
            .unwrap();
        let job = registry
            .update_status("t1", JobStatus::Completed, None)
            .await
            .unwrap();
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn run_id_is_immutable_once_assigned() {
        let registry = registry_with("t1").await;
        registry.assign_run_id("t1", "run_a").await.unwrap();
        // Same id again is fine.
        registry.assign_run_id("t1", "run_a").await.unwrap();
        assert_matches!(
            registry.assign_run_id("t1", "run_b").await,
            Err(RegistryError::RunAlreadyAssigned { run_id, .. }) if run_id == "run_a"
        );
    }

    #[tokio::test]
    async fn enrichment_is_recorded_without_touching_status() {
        let registry = registry_with("t1").await;
        registry.update_status("t1", JobStatus::Processing, None).await.unwrap();
        registry.update_status("t1", JobStatus::Completed, None).await.unwrap();
        let job = registry
            .record_enrichment("t1", EnrichmentStatus::Failed)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.enrichment_status, Some(EnrichmentStatus::Failed));
    }

    #[tokio::test]
    async fn lists_project_jobs_newest_first() {
        let registry = MemoryJobRegistry::new();
        for (id, project) in [("a", "p1"), ("b", "p2"), ("c", "p1")] {
            registry
                .create_job(&NewJob::new(id, project, JobType::Train))
                .await
                .unwrap();
        }
        let ids: Vec<_> = registry
            .list_jobs_by_project("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.task_id)
            .collect();
        assert_eq!(ids, ["c", "a"]);
    }

    #[tokio::test]
    async fn concurrent_completion_and_failure_have_one_winner() {
        let registry = Arc::new(registry_with("t1").await);
        registry.update_status("t1", JobStatus::Processing, None).await.unwrap();

        let a = {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.update_status("t1", JobStatus::Completed, None).await })
        };
        let b = {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.update_status("t1", JobStatus::Failed, Some("x")).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(registry.get_job("t1").await.unwrap().status.is_terminal());
    }
}
