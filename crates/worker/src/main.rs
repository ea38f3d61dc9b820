use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use centella_core::job::{
    QUEUE_GENERATION, QUEUE_MOLECULE, QUEUE_REINFORCEMENT, QUEUE_TRANSFER_LEARNING,
};
use centella_db::{JobRegistry, MemoryJobRegistry, PgJobRegistry};
use centella_engine::{ContainerRunner, EngineRunner, LocalProcessRunner};
use centella_pipeline::{ResultCollector, ScriptDescriptorCalculator};
use centella_worker::config::{EngineMode, PoolSizes, QueueBackend, WorkerConfig};
use centella_worker::executor::JobExecutor;
use centella_worker::pool::{PoolSpec, WorkerPools};
use centella_worker::queue::{MemoryQueue, PgQueue, TaskQueue};

/// Floor for the pool size. Each worker holds at most one connection at a time.
const MIN_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "centella_worker=debug,centella_engine=debug,centella_pipeline=info".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        project_dir = %config.project_dir.display(),
        engine_mode = ?config.engine.mode,
        queue_backend = ?config.queue.backend,
        "Loaded worker configuration"
    );

    // --- Registry and queues ---
    let (registry, queue): (Arc<dyn JobRegistry>, Arc<dyn TaskQueue>) = match config.queue.backend {
        QueueBackend::Postgres => {
            let database_url = config
                .queue
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let total_workers = total_workers(&config.pools) as u32;
            let pool = centella_db::create_pool(database_url, total_workers.max(MIN_DB_CONNECTIONS))
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connection pool created");

            centella_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            centella_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            let registry: Arc<dyn JobRegistry> = Arc::new(PgJobRegistry::new(pool.clone()));
            let queue: Arc<dyn TaskQueue> =
                Arc::new(PgQueue::new(pool, config.queue.visibility_timeout));
            (registry, queue)
        }
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory registry and queues; nothing survives a restart");
            let registry: Arc<dyn JobRegistry> = Arc::new(MemoryJobRegistry::new());
            let queue: Arc<dyn TaskQueue> =
                Arc::new(MemoryQueue::new(config.queue.visibility_timeout));
            (registry, queue)
        }
    };

    // --- Engine ---
    let runner: Arc<dyn EngineRunner> = match config.engine.mode {
        EngineMode::Local => Arc::new(LocalProcessRunner::new(
            &config.engine.binary,
            config.engine.timeout,
        )),
        EngineMode::Container => Arc::new(ContainerRunner::new(
            &config.engine.runtime,
            &config.engine.container,
            &config.engine.binary,
            config.engine.timeout,
        )),
    };

    // --- Result collection ---
    let calculator = Arc::new(ScriptDescriptorCalculator::new(
        &config.descriptors.interpreter,
        &config.descriptors.script,
        config.descriptors.timeout,
    ));
    let collector = Arc::new(ResultCollector::new(calculator));

    let executor = Arc::new(JobExecutor::new(
        registry,
        runner,
        collector,
        config.project_dir.clone(),
        config.prior_model.clone(),
        config.retry.clone(),
    ));

    // --- Worker pools ---
    let specs = pool_specs(&config.pools);
    let cancel = CancellationToken::new();
    let pools = WorkerPools::start(
        &specs,
        queue,
        executor,
        config.queue.poll_interval,
        cancel.clone(),
    );
    tracing::info!(?specs, "Worker pools started");

    shutdown_signal().await;

    // In-flight engine runs finish; backoff waits end early and their
    // tasks are returned to the queue.
    cancel.cancel();
    pools.join().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn pool_specs(sizes: &PoolSizes) -> Vec<PoolSpec> {
    vec![
        PoolSpec {
            queue: QUEUE_TRANSFER_LEARNING,
            workers: sizes.transfer_learning,
        },
        PoolSpec {
            queue: QUEUE_REINFORCEMENT,
            workers: sizes.reinforcement,
        },
        PoolSpec {
            queue: QUEUE_GENERATION,
            workers: sizes.generation,
        },
        PoolSpec {
            queue: QUEUE_MOLECULE,
            workers: sizes.molecule,
        },
    ]
}

fn total_workers(sizes: &PoolSizes) -> usize {
    sizes.transfer_learning + sizes.reinforcement + sizes.generation + sizes.molecule
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
