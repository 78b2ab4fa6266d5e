//! Process spawning and lifecycle primitives.
//!
//! [`ProcessHandle`] wraps one spawned OS process with captured output and an
//! idempotent kill. [`run_to_completion`] executes short-lived setup commands
//! (dependency install, migrations) with a hard timeout so a wedged install
//! can never hang a run.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

/// Captured output lines retained per stream.
const CAPTURE_LINES: usize = 200;

/// Lines of stderr included in error diagnostics.
const TAIL_LINES: usize = 5;

/// The spawn itself failed; no process was created.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The working directory does not exist or is not a directory.
    #[error("working directory {0} does not exist")]
    MissingWorkingDir(PathBuf),

    /// An empty argv was supplied.
    #[error("cannot spawn an empty command")]
    EmptyCommand,

    /// The OS refused the spawn (missing executable, permissions, ...).
    #[error("failed to spawn `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A bounded command execution went wrong.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be spawned at all.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The command ran past its execution timeout and was killed.
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// An I/O error occurred while waiting on the command.
    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
    /// Wall-clock time the command took.
    pub duration: Duration,
}

impl CommandOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last few stderr lines, for error messages.
    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr, TAIL_LINES)
    }
}

/// Runs `argv` in `dir` to completion, capturing output, with a hard timeout.
///
/// On timeout the child is killed (the future owns it with `kill_on_drop`)
/// and `CommandError::Timeout` is returned; nothing is left running.
pub async fn run_to_completion(
    argv: &[String],
    dir: &Path,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let start = Instant::now();
    let rendered = argv.join(" ");

    let mut command = build_command(argv, dir)?;
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| {
        SpawnError::Io {
            command: rendered.clone(),
            source,
        }
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::Timeout {
            command: rendered.clone(),
            timeout,
        })?
        .map_err(|source| CommandError::Io {
            command: rendered,
            source,
        })?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration: start.elapsed(),
    })
}

/// A running (or exited) OS process owned by the orchestration layer.
///
/// Output is drained continuously by background tasks so the child can never
/// block on a full pipe. `kill` is idempotent: calling it on an exited or
/// already-killed process is a no-op and never signals a reused PID.
#[derive(Debug)]
pub struct ProcessHandle {
    argv: Vec<String>,
    dir: PathBuf,
    pid: Option<u32>,
    child: Child,
    stdout: OutputCapture,
    stderr: OutputCapture,
    exited: bool,
}

impl ProcessHandle {
    /// Spawns `argv` in `dir` as a background process with piped output.
    pub fn spawn(argv: &[String], dir: &Path) -> Result<Self, SpawnError> {
        let mut command = build_command(argv, dir)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Last-resort backstop; explicit teardown remains the contract.
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SpawnError::Io {
            command: argv.join(" "),
            source,
        })?;

        let pid = child.id();
        let stdout = OutputCapture::drain(child.stdout.take());
        let stderr = OutputCapture::drain(child.stderr.take());
        debug!(command = %argv.join(" "), ?pid, "spawned process");

        Ok(Self {
            argv: argv.to_vec(),
            dir: dir.to_path_buf(),
            pid,
            child,
            stdout,
            stderr,
            exited: false,
        })
    }

    /// OS process id, if the process ever started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The command this handle was spawned with.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The working directory the process runs in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => {
                self.exited = true;
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!(pid = ?self.pid, error = %err, "liveness check failed");
                false
            }
        }
    }

    /// Waits for the process to exit, bounded by `timeout`.
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExitStatus, CommandError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exited = true;
                Ok(status)
            }
            Ok(Err(source)) => Err(CommandError::Io {
                command: self.argv.join(" "),
                source,
            }),
            Err(_) => Err(CommandError::Timeout {
                command: self.argv.join(" "),
                timeout,
            }),
        }
    }

    /// Kills the process. Idempotent: an already-exited or already-killed
    /// process is a no-op.
    pub async fn kill(&mut self) {
        if !self.is_running() {
            trace!(pid = ?self.pid, "kill skipped, process already exited");
            return;
        }
        match self.child.kill().await {
            Ok(()) => {
                debug!(pid = ?self.pid, "killed process");
                self.exited = true;
            }
            // An exited-in-the-meantime child surfaces as InvalidInput.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {
                self.exited = true;
            }
            Err(err) => {
                warn!(pid = ?self.pid, error = %err, "kill failed");
            }
        }
    }

    /// Last captured output lines, stderr first, for diagnostics.
    pub fn output_tail(&self) -> String {
        let stderr = self.stderr.tail(TAIL_LINES);
        let stdout = self.stdout.tail(TAIL_LINES);
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr,
            _ => stdout,
        }
    }
}

/// Bounded, thread-safe buffer of captured output lines.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputCapture {
    /// Starts a background task draining `reader` line-by-line into the buffer.
    fn drain<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = Self::default();
        let Some(reader) = reader else {
            return capture;
        };
        let buffer = Arc::clone(&capture.lines);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buffer = lock(&buffer);
                if buffer.len() == CAPTURE_LINES {
                    buffer.pop_front();
                }
                buffer.push_back(line);
            }
        });
        capture
    }

    /// Last `n` captured lines joined with newlines.
    pub fn tail(&self, n: usize) -> String {
        let buffer = lock(&self.lines);
        let skip = buffer.len().saturating_sub(n);
        buffer
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn lock(lines: &Mutex<VecDeque<String>>) -> MutexGuard<'_, VecDeque<String>> {
    match lines.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_command(argv: &[String], dir: &Path) -> Result<Command, SpawnError> {
    if !dir.is_dir() {
        return Err(SpawnError::MissingWorkingDir(dir.to_path_buf()));
    }
    let Some((exe, args)) = argv.split_first() else {
        return Err(SpawnError::EmptyCommand);
    };
    let mut command = Command::new(exe);
    command.args(args).current_dir(dir);
    Ok(command)
}

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}
