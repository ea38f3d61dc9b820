//! Per-job-type delivery channels.
//!
//! Delivery is at-least-once: a received task stays invisible to other
//! workers until it is acked, nacked or its lease runs out, after which it
//! is delivered again. Consumers renew the lease while they work and
//! de-duplicate by `task_id`.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use centella_core::request::JobRequest;
use centella_core::types::{ProjectId, TaskId};
use serde::{Deserialize, Serialize};

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

/// Payload carried by a queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub request: JobRequest,
}

/// A received queue entry. Must be acked or nacked by the receiver.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Backend-specific receipt.
    pub id: i64,
    pub queue: String,
    pub task_id: TaskId,
    pub payload: serde_json::Value,
    /// 1 on first delivery.
    pub delivery_count: i32,
}

impl Delivery {
    /// Decode the payload.
    pub fn message(&self) -> Result<TaskMessage, QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(QueueError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to encode task: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode task: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<(), QueueError>;

    /// Take the oldest visible entry of `queue`, if any.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError>;

    /// Remove a processed entry.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return an entry to its queue, visible again after `delay`.
    async fn nack(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError>;

    /// How long a received entry stays invisible without renewal.
    fn visibility_timeout(&self) -> Duration;

    /// Renew the lease of a received entry for another visibility timeout.
    /// `false` if this delivery no longer holds the entry: its lease ran out
    /// (and it may have been redelivered) or it was acked.
    async fn extend_lease(&self, delivery: &Delivery) -> Result<bool, QueueError>;
}

pub(crate) fn encode(message: &TaskMessage) -> Result<serde_json::Value, QueueError> {
    serde_json::to_value(message).map_err(QueueError::Encode)
}
