//! Queue entries stored in the `task_queue` table.
//!
//! Receiving claims the oldest visible row with `FOR UPDATE SKIP LOCKED`
//! and leases it by setting `locked_until`, so concurrent workers never
//! receive the same row while its lease is live.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use super::{encode, Delivery, QueueError, TaskMessage, TaskQueue};

#[derive(Debug, FromRow)]
struct QueueRow {
    id: i64,
    queue_name: String,
    task_id: String,
    payload: serde_json::Value,
    delivery_count: i32,
}

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl TaskQueue for PgQueue {
    async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = encode(message)?;
        sqlx::query("INSERT INTO task_queue (queue_name, task_id, payload) VALUES ($1, $2, $3)")
            .bind(queue)
            .bind(&message.task_id)
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let row = sqlx::query_as::<_, QueueRow>(
            "UPDATE task_queue \
             SET locked_until = NOW() + make_interval(secs => $2), \
                 delivery_count = delivery_count + 1 \
             WHERE id = ( \
                 SELECT id FROM task_queue \
                 WHERE queue_name = $1 \
                   AND visible_at <= NOW() \
                   AND (locked_until IS NULL OR locked_until < NOW()) \
                 ORDER BY id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, queue_name, task_id, payload, delivery_count",
        )
        .bind(queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Delivery {
            id: r.id,
            queue: r.queue_name,
            task_id: r.task_id,
            payload: r.payload,
            delivery_count: r.delivery_count,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM task_queue WHERE id = $1")
            .bind(delivery.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE task_queue \
             SET locked_until = NULL, visible_at = NOW() + make_interval(secs => $2) \
             WHERE id = $1",
        )
        .bind(delivery.id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    async fn extend_lease(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue \
             SET locked_until = NOW() + make_interval(secs => $3) \
             WHERE id = $1 AND delivery_count = $2 AND locked_until > NOW()",
        )
        .bind(delivery.id)
        .bind(delivery.delivery_count)
        .bind(self.visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
