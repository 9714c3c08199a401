use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use copilot_relay_error::RelayError;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Affirmative answer fed to interactive confirmation prompts.
const AFFIRMATION: &[u8] = b"y\n";

/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: String,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    /// Number of `y` lines written to stdin before it is closed. `None`
    /// leaves stdin detached.
    pub affirmations: Option<usize>,
}

impl RunRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
            affirmations: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn affirmations(mut self, affirmations: Option<usize>) -> Self {
        self.affirmations = affirmations;
        self
    }
}

/// Outcome of one subprocess invocation.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub succeeded: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub launch_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milestone lines seen while streaming; empty for plain runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub milestones: Vec<String>,
}

impl ProcessResult {
    pub(crate) fn launch_failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_code: -1,
            launch_failed: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub(crate) fn timeout(timeout: Duration, stdout: String) -> Self {
        Self {
            succeeded: false,
            exit_code: -1,
            stdout,
            timed_out: true,
            error: Some(format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            )),
            ..Self::default()
        }
    }

    /// Convert a failed result into the matching error. `None` when the
    /// process succeeded.
    pub fn to_error(&self, command: &str, timeout: Duration) -> Option<RelayError> {
        if self.succeeded {
            return None;
        }
        if self.timed_out {
            return Some(RelayError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        if self.launch_failed {
            return Some(RelayError::Launch {
                command: command.to_string(),
                message: self.error.clone().unwrap_or_default(),
            });
        }
        let message = self
            .error
            .clone()
            .filter(|error| !error.trim().is_empty())
            .or_else(|| Some(self.stderr.trim().to_string()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| format!("process exited with code {}", self.exit_code));
        Some(RelayError::NonZeroExit {
            exit_code: self.exit_code,
            message,
        })
    }
}

/// Run `sh -c <command>` to completion, capturing stdout and stderr
/// separately. Never fails: launch errors and timeouts come back as values.
pub async fn run(request: &RunRequest) -> ProcessResult {
    let started = Instant::now();
    let mut command = shell_command(&request.command, request.working_dir.as_deref());
    command
        .stdin(stdin_mode(request.affirmations))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match spawn(&mut command, &request.command) {
        Ok(child) => child,
        Err(result) => return result,
    };

    if let Some(count) = request.affirmations {
        feed_affirmations(child.stdin.take(), count);
    }

    let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

    let status = match tokio::time::timeout(request.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "failed to wait for process");
            abort_readers([stdout, stderr]);
            terminate(&mut child).await;
            return ProcessResult {
                succeeded: false,
                exit_code: -1,
                error: Some(err.to_string()),
                ..ProcessResult::default()
            };
        }
        Err(_) => {
            tracing::warn!(
                command = %request.command,
                timeout_ms = request.timeout.as_millis() as u64,
                "process timed out, killing"
            );
            abort_readers([stdout, stderr]);
            terminate(&mut child).await;
            return ProcessResult::timeout(request.timeout, String::new());
        }
    };

    let deadline = tokio::time::Instant::from_std(started + request.timeout);
    let stdout = collect(stdout, deadline).await;
    let stderr = collect(stderr, deadline).await;
    let exit_code = status.code().unwrap_or(-1);

    tracing::debug!(
        exit_code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "process finished"
    );

    ProcessResult {
        succeeded: status.success(),
        exit_code,
        stdout,
        stderr,
        ..ProcessResult::default()
    }
}

pub(crate) fn shell_command(command: &str, working_dir: Option<&Path>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    // Own process group so a timeout can take down the whole pipeline.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

pub(crate) fn stdin_mode(affirmations: Option<usize>) -> Stdio {
    if affirmations.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

pub(crate) fn spawn(command: &mut Command, command_line: &str) -> Result<Child, ProcessResult> {
    let spawn_start = Instant::now();
    match command.spawn() {
        Ok(child) => {
            tracing::debug!(
                pid = child.id().unwrap_or(0),
                elapsed_ms = spawn_start.elapsed().as_millis() as u64,
                command = %command_line,
                "process spawned"
            );
            Ok(child)
        }
        Err(err) => {
            tracing::error!(command = %command_line, error = %err, "failed to spawn process");
            Err(ProcessResult::launch_failure(err.to_string()))
        }
    }
}

/// Pre-answer up to `count` confirmation prompts, then close stdin. Prompts
/// beyond `count` see EOF.
pub(crate) fn feed_affirmations(stdin: Option<ChildStdin>, count: usize) {
    let Some(mut stdin) = stdin else {
        return;
    };
    tokio::spawn(async move {
        for _ in 0..count {
            if let Err(err) = stdin.write_all(AFFIRMATION).await {
                tracing::debug!(error = %err, "stdin closed before all affirmations were written");
                return;
            }
        }
        let _ = stdin.flush().await;
    });
}

/// Kill the child and its process group, then reap it.
pub(crate) async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    if let Err(err) = child.wait().await {
        tracing::warn!(error = %err, "failed to reap killed process");
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        tracing::debug!(error = %err, "output pipe read failed");
    }
    buffer
}

async fn collect(
    reader: Option<tokio::task::JoinHandle<Vec<u8>>>,
    deadline: tokio::time::Instant,
) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "output reader task failed");
            String::new()
        }
        Err(_) => {
            // A background grandchild is still holding the pipe open.
            handle.abort();
            String::new()
        }
    }
}

fn abort_readers<const N: usize>(readers: [Option<tokio::task::JoinHandle<Vec<u8>>>; N]) {
    for reader in readers.into_iter().flatten() {
        reader.abort();
    }
}
