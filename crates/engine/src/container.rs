//! Runs the engine inside an already running container.
//!
//! The projects directory must be mounted at the same path inside the
//! container, since the config document and the command line both carry
//! host paths.

use std::time::Duration;

use async_trait::async_trait;
use centella_core::config::{ConfigDocument, OutputPaths};
use tokio::process::Command;

use crate::error::EngineError;
use crate::runner::{self, tail, EngineRunner, ExecutionResult};

/// Exit codes `docker exec` / `podman exec` use for their own failures
/// (daemon error, command not invokable, command not found), as opposed to
/// the engine's.
const RUNTIME_EXIT_CODES: [i32; 3] = [125, 126, 127];

/// Invokes `<runtime> exec <container> <engine> -l <log> <config>`.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    runtime: String,
    container: String,
    engine: String,
    timeout: Duration,
}

impl ContainerRunner {
    pub fn new(
        runtime: impl Into<String>,
        container: impl Into<String>,
        engine: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            container: container.into(),
            engine: engine.into(),
            timeout,
        }
    }
}

#[async_trait]
impl EngineRunner for ContainerRunner {
    async fn execute(
        &self,
        document: &ConfigDocument,
        outputs: &OutputPaths,
    ) -> Result<ExecutionResult, EngineError> {
        runner::write_config(document, outputs).await?;

        let mut cmd = Command::new(&self.runtime);
        cmd.arg("exec")
            .arg(&self.container)
            .arg(&self.engine)
            .arg("-l")
            .arg(&outputs.log_file)
            .arg(&outputs.config_file);

        tracing::info!(
            runtime = %self.runtime,
            container = %self.container,
            run_dir = %outputs.run_dir.display(),
            "Starting engine in container",
        );
        let run = runner::run_engine(&mut cmd, outputs, self.timeout).await?;

        if RUNTIME_EXIT_CODES.contains(&run.output.exit_code) {
            return Err(EngineError::Spawn(format!(
                "{} exec into {} failed with code {}: {}",
                self.runtime,
                self.container,
                run.output.exit_code,
                tail(run.output.stderr.trim(), 500)
            )));
        }
        runner::verify(run, outputs).await
    }
}
