//! One independent worker pool per queue.
//!
//! Each worker loops: receive, process, ack. A backlog on one queue never
//! occupies another queue's workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::executor::{JobExecutor, TaskOutcome};
use crate::queue::{Delivery, TaskQueue};

/// Leases are renewed this many times per visibility timeout.
const RENEWALS_PER_LEASE: u32 = 3;

/// Number of workers to run for one queue.
#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub queue: &'static str,
    pub workers: usize,
}

/// Running worker pools.
pub struct WorkerPools {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPools {
    /// Spawn the workers for every pool. They run until `cancel` fires.
    pub fn start(
        specs: &[PoolSpec],
        queue: Arc<dyn TaskQueue>,
        executor: Arc<JobExecutor>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut handles = Vec::new();
        for spec in specs {
            tracing::info!(queue = spec.queue, workers = spec.workers, "Starting worker pool");
            for index in 0..spec.workers {
                let worker = Worker {
                    queue_name: spec.queue,
                    index,
                    queue: Arc::clone(&queue),
                    executor: Arc::clone(&executor),
                    poll_interval,
                };
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move { worker.run(cancel).await }));
            }
        }
        Self { handles }
    }

    /// Wait for every worker to stop. In-flight jobs run to completion.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

struct Worker {
    queue_name: &'static str,
    index: usize,
    queue: Arc<dyn TaskQueue>,
    executor: Arc<JobExecutor>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(&self, cancel: CancellationToken) {
        tracing::debug!(queue = self.queue_name, worker = self.index, "Worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.queue_name) => received,
            };
            match received {
                Ok(Some(delivery)) => self.handle(delivery, &cancel).await,
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(queue = self.queue_name, error = %e, "Failed to receive task");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!(queue = self.queue_name, worker = self.index, "Worker stopped");
    }

    async fn handle(&self, delivery: Delivery, cancel: &CancellationToken) {
        let message = match delivery.message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    queue = self.queue_name,
                    task_id = %delivery.task_id,
                    error = %e,
                    "Dropping undecodable task",
                );
                self.ack(&delivery).await;
                return;
            }
        };

        tracing::debug!(
            queue = self.queue_name,
            worker = self.index,
            task_id = %message.task_id,
            delivery_count = delivery.delivery_count,
            "Task received",
        );
        let processed = tokio::select! {
            processed = self.executor.process(&message, cancel) => processed,
            () = self.hold_lease(&delivery) => {
                // Another worker may own the task now. Dropping the run
                // kills its engine process.
                tracing::warn!(
                    queue = self.queue_name,
                    task_id = %message.task_id,
                    "Lease lost, abandoning task",
                );
                return;
            }
        };
        match processed {
            Ok(TaskOutcome::Interrupted) => self.nack(&delivery, Duration::ZERO).await,
            Ok(_) => self.ack(&delivery).await,
            Err(e) => {
                tracing::error!(task_id = %message.task_id, error = %e, "Task processing failed, requeueing");
                self.nack(&delivery, self.poll_interval).await;
            }
        }
    }

    /// Keep renewing the lease on `delivery`. Returns only once the lease
    /// is lost.
    async fn hold_lease(&self, delivery: &Delivery) {
        let mut ticker = tokio::time::interval(renewal_period(self.queue.visibility_timeout()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the lease is fresh.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.queue.extend_lease(delivery).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    tracing::warn!(task_id = %delivery.task_id, error = %e, "Failed to renew lease");
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            tracing::error!(task_id = %delivery.task_id, error = %e, "Failed to ack task");
        }
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) {
        if let Err(e) = self.queue.nack(delivery, delay).await {
            tracing::error!(task_id = %delivery.task_id, error = %e, "Failed to nack task");
        }
    }
}

fn renewal_period(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / RENEWALS_PER_LEASE).max(Duration::from_millis(1))
}
