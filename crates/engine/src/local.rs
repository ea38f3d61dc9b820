//! Runs the engine binary as a direct child process.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use centella_core::config::{ConfigDocument, OutputPaths};
use tokio::process::Command;

use crate::error::EngineError;
use crate::runner::{self, EngineRunner, ExecutionResult};

/// Invokes `<binary> -l <log> <config>`.
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl LocalProcessRunner {
    /// `binary` is either a path or a bare name resolved through `PATH`.
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// For explicit paths, fail fast with a clear message if the file is
    /// missing or not executable. Bare names are left to `PATH` lookup.
    async fn check_binary(&self) -> Result<(), EngineError> {
        if self.binary.components().count() <= 1 {
            return Ok(());
        }
        let metadata = tokio::fs::metadata(&self.binary)
            .await
            .map_err(|_| EngineError::Spawn(format!("Engine binary not found: {}", self.binary.display())))?;
        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(EngineError::Spawn(format!(
                "{} is not executable (mode {mode:#o})",
                self.binary.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineRunner for LocalProcessRunner {
    async fn execute(
        &self,
        document: &ConfigDocument,
        outputs: &OutputPaths,
    ) -> Result<ExecutionResult, EngineError> {
        runner::write_config(document, outputs).await?;
        self.check_binary().await?;

        let mut cmd = engine_command(&self.binary, outputs);
        tracing::info!(
            binary = %self.binary.display(),
            run_dir = %outputs.run_dir.display(),
            "Starting engine",
        );
        let run = runner::run_engine(&mut cmd, outputs, self.timeout).await?;
        runner::verify(run, outputs).await
    }
}

fn engine_command(binary: &Path, outputs: &OutputPaths) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("-l").arg(&outputs.log_file).arg(&outputs.config_file);
    cmd
}
