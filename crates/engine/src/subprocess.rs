//! Shared subprocess management.
//!
//! [`run_command`] is the common spawn, I/O and watchdog logic used by both
//! engine runners and by the descriptor calculator. Callers set the program
//! and arguments; everything else is applied here.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Default maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond the limit is read and discarded, so a chatty child never
/// blocks on a full pipe.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// How to run one child process.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// Bytes piped to stdin. Stdin is closed immediately when `None`.
    pub stdin: Option<Vec<u8>>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
    /// Bytes of stdout kept; `None` keeps everything. Use `None` when stdout
    /// carries the result rather than diagnostics.
    pub stdout_limit: Option<usize>,
}

impl ProcessInput {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            stdin: None,
            env_vars: Vec::new(),
            working_directory: None,
            timeout,
            stdout_limit: Some(MAX_OUTPUT_BYTES),
        }
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, feed stdin, capture stdout/stderr and enforce the timeout.
pub async fn run_command(cmd: &mut Command, input: ProcessInput) -> Result<ProcessOutput, ProcessError> {
    // `kill_on_drop(true)` kills the child when it is dropped on timeout.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(program.clone()),
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(program.clone()),
        _ => ProcessError::Io(e),
    })?;

    // Write stdin from its own task so a child that fills its stdout pipe
    // before reading all of stdin cannot deadlock us.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let payload = input.stdin.unwrap_or_default();
        tokio::spawn(async move {
            // The child may close stdin early; that is not an error here.
            let _ = stdin.write_all(&payload).await;
        })
    });

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_limit = input.stdout_limit;
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle, stdout_limit).await });
    let stderr_task =
        tokio::spawn(async move { read_stream(stderr_handle, Some(MAX_OUTPUT_BYTES)).await });

    let wait_result = tokio::time::timeout(input.timeout, child.wait()).await;

    match wait_result {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            if let Some(task) = stdin_task {
                let _ = task.await;
            }
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_elapsed) => {
            // `child` is dropped here, which kills the process.
            Err(ProcessError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, limit: Option<usize>) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let keep = match limit {
            Some(limit) => n.min(limit.saturating_sub(buf.len())),
            None => n,
        };
        buf.extend_from_slice(&chunk[..keep]);
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
