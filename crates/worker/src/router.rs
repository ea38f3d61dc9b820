//! Routes each job type to its dedicated queue.

use std::sync::Arc;

use centella_core::job::JobType;
use centella_core::request::JobRequest;

use crate::queue::{QueueError, TaskMessage, TaskQueue};

/// Publishes tasks to the queue mapped from their job type.
#[derive(Clone)]
pub struct TaskRouter {
    queue: Arc<dyn TaskQueue>,
}

impl TaskRouter {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    /// Queue name for `job_type`.
    pub fn route(job_type: JobType) -> &'static str {
        job_type.queue_name()
    }

    /// Every queue the router can publish to, one per job type.
    pub fn queues() -> [&'static str; 4] {
        JobType::ALL.map(Self::route)
    }

    pub async fn enqueue(
        &self,
        task_id: &str,
        project_id: &str,
        request: &JobRequest,
    ) -> Result<&'static str, QueueError> {
        let queue = Self::route(request.job_type());
        let message = TaskMessage {
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            request: request.clone(),
        };
        self.queue.enqueue(queue, &message).await?;
        tracing::info!(task_id, project_id, queue, "Task enqueued");
        Ok(queue)
    }
}
