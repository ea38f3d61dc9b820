//! Engine failures and their retry classification.

use std::path::PathBuf;
use std::sync::LazyLock;

use centella_core::retry::FailureClass;
use regex::Regex;

/// Exit codes that mean the process was killed from outside (SIGKILL/OOM,
/// SIGTERM) or by a signal we could not decode.
const KILLED_EXIT_CODES: [i32; 3] = [137, 143, -1];

/// Conventional exit code for command-line usage errors.
const USAGE_EXIT_CODE: i32 = 2;

/// Stderr markers that point at a bad configuration document or bad input
/// data rather than at the environment.
static PERMANENT_STDERR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(tomldecodeerror|validationerror|invalid (config|configuration|input|smiles)|configuration error|unknown run_type|smiles_file|no valid smiles)",
    )
    .expect("valid regex")
});

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The config document could not be written. Never retried.
    #[error("Failed to write engine config {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine process (or the container around it) could not start.
    #[error("Failed to start engine: {0}")]
    Spawn(String),

    #[error("Engine timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Engine exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    /// Exit code 0, but the primary artifact was not written by this run.
    #[error("Engine exited successfully but {path} was not produced")]
    MissingOutput { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether retrying the same invocation can succeed.
    pub fn classify(&self) -> FailureClass {
        match self {
            EngineError::ConfigWrite { .. } | EngineError::MissingOutput { .. } => {
                FailureClass::Permanent
            }
            EngineError::Spawn(_) | EngineError::Timeout { .. } | EngineError::Io(_) => {
                FailureClass::Transient
            }
            EngineError::NonZeroExit { exit_code, stderr } => classify_exit(*exit_code, stderr),
        }
    }
}

fn classify_exit(exit_code: i32, stderr: &str) -> FailureClass {
    if KILLED_EXIT_CODES.contains(&exit_code) {
        FailureClass::Transient
    } else if exit_code == USAGE_EXIT_CODE || PERMANENT_STDERR_RE.is_match(stderr) {
        FailureClass::Permanent
    } else {
        FailureClass::Transient
    }
}
