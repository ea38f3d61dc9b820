//! Job orchestration: submission, per-job-type queues and worker pools.
//!
//! ```text
//! JobService::submit_job -> JobRegistry (queued) -> TaskRouter -> TaskQueue
//! WorkerPools -> JobExecutor -> synthesize -> EngineRunner -> ResultCollector
//! ```

pub mod config;
pub mod executor;
pub mod pool;
pub mod queue;
pub mod router;
pub mod service;
