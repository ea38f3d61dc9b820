//! Process-local queues.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{encode, Delivery, QueueError, TaskMessage, TaskQueue};

#[derive(Debug, Clone)]
struct Entry {
    id: i64,
    task_id: String,
    payload: serde_json::Value,
    visible_at: Instant,
    delivery_count: i32,
}

#[derive(Default)]
struct State {
    next_id: i64,
    ready: HashMap<String, VecDeque<Entry>>,
    /// Received but not yet acked, with the lease deadline.
    in_flight: HashMap<i64, (String, Entry, Instant)>,
}

/// In-memory [`TaskQueue`] with the same lease semantics as the Postgres
/// queue.
pub struct MemoryQueue {
    visibility_timeout: Duration,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(State::default()),
        }
    }

    /// Entries waiting or in flight on `queue`.
    pub async fn len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        let ready = state.ready.get(queue).map_or(0, VecDeque::len);
        let in_flight = state.in_flight.values().filter(|(q, _, _)| q == queue).count();
        ready + in_flight
    }

    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }
}

impl State {
    /// Move expired leases back to the front of their queues.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .in_flight
            .iter()
            .filter(|(_, (_, _, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((queue, entry, _)) = self.in_flight.remove(&id) {
                self.ready.entry(queue).or_default().push_front(entry);
            }
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = encode(message)?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let entry = Entry {
            id: state.next_id,
            task_id: message.task_id.clone(),
            payload,
            visible_at: Instant::now(),
            delivery_count: 0,
        };
        state.ready.entry(queue.to_string()).or_default().push_back(entry);
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.reclaim_expired(now);

        let Some(entries) = state.ready.get_mut(queue) else {
            return Ok(None);
        };
        let Some(pos) = entries.iter().position(|e| e.visible_at <= now) else {
            return Ok(None);
        };
        let Some(mut entry) = entries.remove(pos) else {
            return Ok(None);
        };
        entry.delivery_count += 1;

        let delivery = Delivery {
            id: entry.id,
            queue: queue.to_string(),
            task_id: entry.task_id.clone(),
            payload: entry.payload.clone(),
            delivery_count: entry.delivery_count,
        };
        let deadline = now + self.visibility_timeout;
        state.in_flight.insert(entry.id, (queue.to_string(), entry, deadline));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state.lock().await.in_flight.remove(&delivery.id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some((queue, mut entry, _)) = state.in_flight.remove(&delivery.id) {
            entry.visible_at = Instant::now() + delay;
            state.ready.entry(queue).or_default().push_back(entry);
        }
        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    async fn extend_lease(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.reclaim_expired(now);
        match state.in_flight.get_mut(&delivery.id) {
            Some((_, entry, deadline)) if entry.delivery_count == delivery.delivery_count => {
                *deadline = now + self.visibility_timeout;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
