//! The [`EngineRunner`] contract and the steps every runner shares.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use centella_core::config::{ConfigDocument, OutputPaths};
use tokio::process::Command;

use crate::error::EngineError;
use crate::subprocess::{self, ProcessError, ProcessInput, ProcessOutput};

/// Outcome of an engine run that exited 0 and produced its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub primary_artifact: PathBuf,
}

/// Supervises one engine invocation.
///
/// In order: create the run directory, write the config document, run the
/// engine with its log directed to `outputs.log_file`, then check that
/// `outputs.primary_artifact` exists. A failed config write is reported as
/// [`EngineError::ConfigWrite`] and the engine is never started.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn execute(
        &self,
        document: &ConfigDocument,
        outputs: &OutputPaths,
    ) -> Result<ExecutionResult, EngineError>;
}

/// Create the run directory and write the config document into it.
pub(crate) async fn write_config(
    document: &ConfigDocument,
    outputs: &OutputPaths,
) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(&outputs.run_dir)
        .await
        .map_err(|source| EngineError::ConfigWrite {
            path: outputs.run_dir.clone(),
            source,
        })?;
    tokio::fs::write(&outputs.config_file, document.as_bytes())
        .await
        .map_err(|source| EngineError::ConfigWrite {
            path: outputs.config_file.clone(),
            source,
        })?;
    tracing::debug!(config = %outputs.config_file.display(), "Engine config written");
    Ok(())
}

/// A finished engine process and the moment it was started.
pub(crate) struct EngineRun {
    pub output: ProcessOutput,
    pub started: SystemTime,
}

/// Run the prepared engine command under the watchdog and capture its
/// streams. Does not interpret the exit code.
pub(crate) async fn run_engine(
    cmd: &mut Command,
    outputs: &OutputPaths,
    timeout: Duration,
) -> Result<EngineRun, EngineError> {
    let mut input = ProcessInput::with_timeout(timeout);
    input.working_directory = Some(outputs.run_dir.clone());

    let started = SystemTime::now();
    let output = subprocess::run_command(cmd, input).await.map_err(|e| match e {
        ProcessError::NotFound(_) | ProcessError::PermissionDenied(_) => {
            EngineError::Spawn(e.to_string())
        }
        ProcessError::Timeout { elapsed_ms } => EngineError::Timeout { elapsed_ms },
        ProcessError::Io(io) => EngineError::Io(io),
    })?;

    tracing::debug!(
        exit_code = output.exit_code,
        duration_ms = output.duration_ms,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "Engine process exited",
    );
    if output.exit_code != 0 && !output.stderr.is_empty() {
        tracing::warn!(exit_code = output.exit_code, stderr = %tail(&output.stderr, 2000), "Engine stderr");
    }
    Ok(EngineRun { output, started })
}

/// Turn a finished process into a result: exit code 0 and a primary
/// artifact written during this run.
///
/// The artifact may already exist before the run (a trained model from an
/// earlier job, or partial output of a killed attempt in the same run
/// directory), so only a modification time at or after the start counts.
pub(crate) async fn verify(run: EngineRun, outputs: &OutputPaths) -> Result<ExecutionResult, EngineError> {
    let EngineRun { output, started } = run;
    if output.exit_code != 0 {
        return Err(EngineError::NonZeroExit {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    if !written_since(&outputs.primary_artifact, started).await {
        return Err(EngineError::MissingOutput {
            path: outputs.primary_artifact.clone(),
        });
    }
    Ok(ExecutionResult {
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        duration_ms: output.duration_ms,
        primary_artifact: outputs.primary_artifact.clone(),
    })
}

/// Whether `path` exists and was modified at or after `since`.
async fn written_since(path: &Path, since: SystemTime) -> bool {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    modified >= whole_seconds(since)
}

/// `t` rounded down to the second. Some filesystems store modification
/// times with one-second resolution.
fn whole_seconds(t: SystemTime) -> SystemTime {
    t.duration_since(UNIX_EPOCH)
        .map(|d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
        .unwrap_or(t)
}

/// The last `max_chars` characters of `text`.
pub(crate) fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
