//! Worker invoker: subprocess lifecycle for the external restoration
//! workers.
//!
//! Spawns `<interpreter> <script> <args…>`, captures stdout/stderr with a
//! size cap, enforces a hard wall-clock timeout, and supports out-of-band
//! cancellation keyed by job id. The invoker knows nothing about stages.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Hard wall-clock ceiling per invocation (5 minutes).
pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum stdout or stderr size captured per stream (10 MiB).
/// Exceeding it fails the invocation rather than silently truncating.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a worker invocation.
#[derive(Debug)]
pub enum WorkerError {
    /// The worker exceeded the wall-clock ceiling and was killed.
    Timeout,
    /// stdout or stderr exceeded [`MAX_OUTPUT_BYTES`].
    OutputOverflow,
    /// The worker exited with a non-zero code.
    Failed { exit_code: i32, stderr: String },
    /// The invocation was cancelled out-of-band and the worker killed.
    Cancelled,
    /// Spawning or communicating with the process failed.
    Io(std::io::Error),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::OutputOverflow => {
                write!(f, "worker output exceeded {} bytes", MAX_OUTPUT_BYTES)
            }
            Self::Failed { exit_code, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    write!(f, "worker exited with code {exit_code}")
                } else {
                    f.write_str(stderr)
                }
            }
            Self::Cancelled => f.write_str("cancelled"),
            Self::Io(err) => write!(f, "failed to run worker: {err}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Spawns worker scripts and tracks the live ones for cancellation.
#[derive(Debug)]
pub struct WorkerInvoker {
    scripts_dir: PathBuf,
    /// Fixed interpreter override; when `None` the venv interpreter is
    /// resolved per invocation so a bootstrap finishing mid-session is
    /// picked up.
    interpreter: Option<PathBuf>,
    timeout: Duration,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl WorkerInvoker {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            interpreter: None,
            timeout: INVOKE_TIMEOUT,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Force a specific interpreter (tests use `/bin/sh` fakes).
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Override the wall-clock ceiling (tests shrink it).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The interpreter used for the next invocation: the bootstrap venv's
    /// python when present, else `python3` from PATH.
    pub fn interpreter(&self) -> PathBuf {
        if let Some(fixed) = &self.interpreter {
            return fixed.clone();
        }
        let venv_python = venv_python(&self.scripts_dir);
        if venv_python.is_file() {
            venv_python
        } else {
            PathBuf::from("python3")
        }
    }

    /// Whether an invocation is currently registered under `key`.
    pub fn is_running(&self, key: &str) -> bool {
        self.running.lock().unwrap().contains_key(key)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Send a graceful termination to the invocation registered under
    /// `key`. No-op when nothing is registered.
    pub fn cancel(&self, key: &str) {
        if let Some(token) = self.running.lock().unwrap().get(key) {
            token.cancel();
        }
    }

    /// Run `script` with `argv`, registered under `key` for the duration.
    ///
    /// Returns the trimmed stdout on success.
    pub async fn invoke(
        &self,
        script: &str,
        argv: &[String],
        key: &str,
    ) -> Result<String, WorkerError> {
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap()
            .insert(key.to_string(), token.clone());

        let result = self.run(script, argv, &token).await;

        // Deregister on every exit path.
        self.running.lock().unwrap().remove(key);
        result
    }

    async fn run(
        &self,
        script: &str,
        argv: &[String],
        token: &CancellationToken,
    ) -> Result<String, WorkerError> {
        let script_path = self.scripts_dir.join(script);
        let interpreter = self.interpreter();

        tracing::debug!(
            script = %script_path.display(),
            interpreter = %interpreter.display(),
            "Spawning worker"
        );

        // `kill_on_drop` is the backstop; the explicit kills below are the
        // normal cancellation/timeout path.
        let mut child = Command::new(&interpreter)
            .arg(&script_path)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Io)?;

        // Read both streams in tasks so `child.wait()` can run concurrently.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        enum Exit {
            Status(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let exit = tokio::select! {
            status = child.wait() => Exit::Status(status),
            _ = token.cancelled() => Exit::Cancelled,
            _ = tokio::time::sleep(self.timeout) => Exit::TimedOut,
        };

        let status = match exit {
            Exit::Cancelled => {
                let _ = child.kill().await;
                return Err(WorkerError::Cancelled);
            }
            Exit::TimedOut => {
                let _ = child.kill().await;
                return Err(WorkerError::Timeout);
            }
            Exit::Status(status) => status.map_err(WorkerError::Io)?,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        if stdout.len() > MAX_OUTPUT_BYTES || stderr.len() > MAX_OUTPUT_BYTES {
            return Err(WorkerError::OutputOverflow);
        }

        if !status.success() {
            return Err(WorkerError::Failed {
                exit_code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

/// The interpreter path the environment bootstrap installs next to the
/// worker scripts.
pub fn venv_python(scripts_dir: &Path) -> PathBuf {
    scripts_dir.join("venv").join("bin").join("python")
}

/// Read an output stream to the end, keeping one byte past the cap so
/// overflow is detectable. The stream is always drained fully; stopping
/// early would leave the child blocked on a full pipe.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let keep = (MAX_OUTPUT_BYTES + 1).saturating_sub(buf.len()).min(n);
                buf.extend_from_slice(&chunk[..keep]);
            }
        }
    }
    buf
}
