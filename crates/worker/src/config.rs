//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use centella_core::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value \"{value}\": {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// How the engine is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMode {
    /// `ENGINE_BINARY` as a direct child process.
    Local,
    /// `CONTAINER_RUNTIME exec ENGINE_CONTAINER ENGINE_BINARY ...`.
    Container,
}

/// Where jobs and queue entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// `jobs` and `task_queue` tables; requires `DATABASE_URL`.
    Postgres,
    /// Process-local registry and queues. Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EngineMode,
    pub binary: String,
    pub container: String,
    pub runtime: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DescriptorConfig {
    pub interpreter: String,
    pub script: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub database_url: Option<String>,
    pub poll_interval: Duration,
    /// How long a received task stays invisible to other workers.
    pub visibility_timeout: Duration,
}

/// Concurrent workers per queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSizes {
    pub transfer_learning: usize,
    pub reinforcement: usize,
    pub generation: usize,
    pub molecule: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub project_dir: PathBuf,
    pub prior_model: PathBuf,
    pub engine: EngineConfig,
    pub descriptors: DescriptorConfig,
    pub queue: QueueConfig,
    pub pools: PoolSizes,
    pub retry: RetryPolicy,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                               |
    /// |---------------------------------|---------------------------------------|
    /// | `PROJECT_DIR`                   | `/app/projects`                       |
    /// | `PRIOR_MODEL_PATH`              | `reinvent/priors/reinvent.prior`      |
    /// | `ENGINE_MODE`                   | `local` (`local` or `container`)      |
    /// | `ENGINE_BINARY`                 | `reinvent`                            |
    /// | `ENGINE_CONTAINER`              | `centella-reinvent-backend-reinvent`  |
    /// | `CONTAINER_RUNTIME`             | `docker`                              |
    /// | `ENGINE_TIMEOUT_SECS`           | `21600`                               |
    /// | `DESCRIPTOR_SCRIPT`             | `scripts/descriptors.py`              |
    /// | `DESCRIPTOR_INTERPRETER`        | `python3`                             |
    /// | `DESCRIPTOR_TIMEOUT_SECS`       | `600`                                 |
    /// | `QUEUE_BACKEND`                 | `postgres` (`postgres` or `memory`)   |
    /// | `DATABASE_URL`                  | required for `postgres`               |
    /// | `QUEUE_POLL_INTERVAL_MS`        | `1000`                                |
    /// | `QUEUE_VISIBILITY_TIMEOUT_SECS` | `25200`                               |
    /// | `TL_WORKERS`                    | `1`                                   |
    /// | `RL_WORKERS`                    | `1`                                   |
    /// | `GENERATION_WORKERS`            | `4`                                   |
    /// | `MOLECULE_WORKERS`              | `2`                                   |
    /// | `RETRY_MAX_ATTEMPTS`            | `3`                                   |
    /// | `RETRY_BASE_DELAY_MS`           | `2000`                                |
    /// | `RETRY_MAX_DELAY_MS`            | `60000`                               |
    /// | `LOG_FORMAT`                    | `text` (`text` or `json`)             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let mode = match env.string("ENGINE_MODE", "local").as_str() {
            "local" => EngineMode::Local,
            "container" => EngineMode::Container,
            other => return Err(invalid("ENGINE_MODE", other, "expected local or container")),
        };
        let backend = match env.string("QUEUE_BACKEND", "postgres").as_str() {
            "postgres" => QueueBackend::Postgres,
            "memory" => QueueBackend::Memory,
            other => return Err(invalid("QUEUE_BACKEND", other, "expected postgres or memory")),
        };
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if backend == QueueBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let json_logs = match env.string("LOG_FORMAT", "text").as_str() {
            "text" => false,
            "json" => true,
            other => return Err(invalid("LOG_FORMAT", other, "expected text or json")),
        };

        let retry = RetryPolicy {
            max_attempts: env.positive("RETRY_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(env.parse("RETRY_BASE_DELAY_MS", 2000)?),
            max_delay: Duration::from_millis(env.parse("RETRY_MAX_DELAY_MS", 60_000)?),
        };

        let config = Self {
            project_dir: env.string("PROJECT_DIR", "/app/projects").into(),
            prior_model: env.string("PRIOR_MODEL_PATH", "reinvent/priors/reinvent.prior").into(),
            engine: EngineConfig {
                mode,
                binary: env.string("ENGINE_BINARY", "reinvent"),
                container: env.string("ENGINE_CONTAINER", "centella-reinvent-backend-reinvent"),
                runtime: env.string("CONTAINER_RUNTIME", "docker"),
                timeout: Duration::from_secs(env.positive("ENGINE_TIMEOUT_SECS", 21_600)?),
            },
            descriptors: DescriptorConfig {
                interpreter: env.string("DESCRIPTOR_INTERPRETER", "python3"),
                script: env.string("DESCRIPTOR_SCRIPT", "scripts/descriptors.py").into(),
                timeout: Duration::from_secs(env.positive("DESCRIPTOR_TIMEOUT_SECS", 600)?),
            },
            queue: QueueConfig {
                backend,
                database_url,
                poll_interval: Duration::from_millis(env.positive("QUEUE_POLL_INTERVAL_MS", 1000)?),
                visibility_timeout: Duration::from_secs(
                    env.positive("QUEUE_VISIBILITY_TIMEOUT_SECS", 25_200)?,
                ),
            },
            pools: PoolSizes {
                transfer_learning: env.positive("TL_WORKERS", 1)?,
                reinforcement: env.positive("RL_WORKERS", 1)?,
                generation: env.positive("GENERATION_WORKERS", 4)?,
                molecule: env.positive("MOLECULE_WORKERS", 2)?,
            },
            retry,
            json_logs,
        };
        config.check_lease()?;
        Ok(config)
    }

    /// Workers renew their lease while a task runs. The lease on its own
    /// must still outlast one attempt (engine run, enrichment and the
    /// following backoff), so a few failed renewals never hand a live task
    /// to a second worker.
    fn check_lease(&self) -> Result<(), ConfigError> {
        let attempt = self.engine.timeout + self.descriptors.timeout + self.retry.max_delay;
        if self.queue.visibility_timeout < attempt {
            return Err(invalid(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                &self.queue.visibility_timeout.as_secs().to_string(),
                &format!(
                    "must be at least {}s (engine timeout + descriptor timeout + max retry delay)",
                    attempt.as_secs_f64().ceil()
                ),
            ));
        }
        Ok(())
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, name: &str, default: &str) -> String {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(name).map(|v| v.trim().to_string()) {
            None => Ok(default),
            Some(v) if v.is_empty() => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| invalid(name, &v, &e.to_string())),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(invalid(name, &value.to_string(), "must be greater than zero"));
        }
        Ok(value)
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
