//! Operations backed by the external agent binary or the host shell.

use std::sync::Arc;
use std::time::Duration;

use copilot_relay_agent_runner::{
    run, stream_run, AgentInvocation, ProcessResult, RunRequest, StreamEvent,
};
use copilot_relay_error::RelayError;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::formatter::{format, FormattedResult};
use crate::session::{SessionMode, SessionRegistry, UserId};

/// Substrings that mark a shell command as too dangerous to run. Matched
/// case-insensitively anywhere in the command.
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "rm -rf", "mkfs", "dd if=", "> /dev/", "format", "shutdown", "reboot", "init 0", "init 6",
    "poweroff", "halt",
];

/// Host probes shown on the status screen.
pub const STATUS_PROBES: &[(&str, &str)] = &[
    ("Uptime", "uptime -p"),
    ("CPU Load", "cat /proc/loadavg | awk '{print $1\" \"$2\" \"$3}'"),
    (
        "Memory",
        "free -h | grep Mem | awk '{print \"Used: \"$3\" / Total: \"$2}'",
    ),
    (
        "Disk",
        "df -h / | tail -1 | awk '{print \"Used: \"$3\" / Total: \"$2\" (\"$5\" full)\"}'",
    ),
    ("Processes", "ps aux | wc -l"),
];

const EXPLAIN_PREFIX: &str = "explain this command: ";

/// Completed (or failed) agent task.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub result: ProcessResult,
    pub formatted: FormattedResult,
    /// Whether the task continued an earlier conversation.
    pub continued: bool,
    command: String,
    timeout: Duration,
}

impl AgentRun {
    pub fn error(&self) -> Option<RelayError> {
        self.result.to_error(&self.command, self.timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProbe {
    pub name: &'static str,
    /// `None` when the probe failed.
    pub value: Option<String>,
}

pub struct AgentClient {
    config: Arc<RelayConfig>,
    sessions: Arc<SessionRegistry>,
}

impl AgentClient {
    pub fn new(config: Arc<RelayConfig>, sessions: Arc<SessionRegistry>) -> Self {
        Self { config, sessions }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run an agent task in the user's agent workspace, forwarding classified
    /// output lines to `events` while it runs.
    pub async fn run_task(
        &self,
        user: UserId,
        task: &str,
        continue_session: bool,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<AgentRun, RelayError> {
        let preferences = self.sessions.preferences(user).await;
        let lease = self
            .sessions
            .begin_or_continue(SessionMode::Agent, user, continue_session)
            .await?;

        let invocation = AgentInvocation::new(&self.config.agent_binary, task)
            .model(preferences.model.as_str())
            .continue_session(!lease.is_new())
            .allow_all(true)
            .workspace(lease.workspace());
        let command = invocation.command_line();
        let affirmations = preferences
            .auto_approve
            .then_some(self.config.auto_approve_affirmations);
        let request = RunRequest::new(command.clone())
            .timeout(self.config.agent_timeout())
            .working_dir(lease.workspace())
            .affirmations(affirmations);

        tracing::info!(
            user = %user,
            model = %preferences.model,
            continued = !lease.is_new(),
            auto_approve = preferences.auto_approve,
            "running agent task"
        );
        let result = stream_run(&request, events).await;
        let formatted = format(&result.stdout);

        Ok(AgentRun {
            result,
            formatted,
            continued: !lease.is_new(),
            command,
            timeout: request.timeout,
        })
    }

    /// One conversational turn in the user's chat workspace. Tools stay
    /// disabled.
    pub async fn chat(
        &self,
        user: UserId,
        message: &str,
        continue_session: bool,
    ) -> Result<String, RelayError> {
        let preferences = self.sessions.preferences(user).await;
        let lease = self
            .sessions
            .begin_or_continue(SessionMode::Chat, user, continue_session)
            .await?;

        let command = AgentInvocation::new(&self.config.agent_binary, message)
            .model(preferences.model.as_str())
            .continue_session(!lease.is_new())
            .workspace(lease.workspace())
            .command_line();
        let timeout = self.config.chat_timeout();
        let request = RunRequest::new(command.clone())
            .timeout(timeout)
            .working_dir(lease.workspace());
        let result = run(&request).await;

        output_or_error(result, &command, timeout, "No response available")
    }

    pub async fn suggest(&self, user: UserId, query: &str) -> Result<String, RelayError> {
        self.one_shot(user, query, "No suggestion available").await
    }

    pub async fn explain(&self, user: UserId, command: &str) -> Result<String, RelayError> {
        self.one_shot(
            user,
            &format!("{EXPLAIN_PREFIX}{command}"),
            "No explanation available",
        )
        .await
    }

    async fn one_shot(
        &self,
        user: UserId,
        prompt: &str,
        fallback: &str,
    ) -> Result<String, RelayError> {
        let preferences = self.sessions.preferences(user).await;
        let command = AgentInvocation::new(&self.config.agent_binary, prompt)
            .model(preferences.model.as_str())
            .allow_all(true)
            .command_line();
        let timeout = self.config.suggest_timeout();
        let result = run(&RunRequest::new(command.clone()).timeout(timeout)).await;
        output_or_error(result, &command, timeout, fallback)
    }

    /// Execute a shell command on the host. Dangerous commands are refused
    /// before anything is launched. A non-zero exit is reported in the output,
    /// not as an error.
    pub async fn run_command(&self, command: &str) -> Result<String, RelayError> {
        check_command_safety(command)?;

        let timeout = self.config.command_timeout();
        let result = run(&RunRequest::new(command).timeout(timeout)).await;
        if result.timed_out || result.launch_failed {
            return Err(result
                .to_error(command, timeout)
                .unwrap_or(RelayError::Timeout {
                    seconds: timeout.as_secs(),
                }));
        }
        Ok(render_command_output(&result))
    }

    pub async fn system_status(&self) -> Vec<StatusProbe> {
        let timeout = self.config.status_timeout();
        let mut probes = Vec::with_capacity(STATUS_PROBES.len());
        for &(name, command) in STATUS_PROBES {
            let result = run(&RunRequest::new(command).timeout(timeout)).await;
            let value = result
                .succeeded
                .then(|| result.stdout.trim().to_string());
            if value.is_none() {
                tracing::debug!(probe = name, error = ?result.error, "status probe failed");
            }
            probes.push(StatusProbe { name, value });
        }
        probes
    }
}

fn output_or_error(
    result: ProcessResult,
    command: &str,
    timeout: Duration,
    fallback: &str,
) -> Result<String, RelayError> {
    if let Some(err) = result.to_error(command, timeout) {
        return Err(err);
    }
    let output = result.stdout.trim();
    Ok(if output.is_empty() {
        fallback.to_string()
    } else {
        output.to_string()
    })
}

/// Reject commands containing any of [`DANGEROUS_KEYWORDS`].
pub fn check_command_safety(command: &str) -> Result<(), RelayError> {
    let lowered = command.to_lowercase();
    match DANGEROUS_KEYWORDS
        .iter()
        .find(|keyword| lowered.contains(*keyword))
    {
        Some(keyword) => {
            tracing::warn!(command = %command, keyword, "blocked dangerous command");
            Err(RelayError::Blocked {
                reason: format!("dangerous command detected ({keyword})"),
            })
        }
        None => Ok(()),
    }
}

pub fn render_command_output(result: &ProcessResult) -> String {
    let stdout = result.stdout.trim();
    let stderr = result.stderr.trim();
    let mut text = String::new();
    if !stdout.is_empty() {
        text.push_str(&format!("Output:\n{stdout}\n"));
    }
    if !stderr.is_empty() {
        text.push_str(&format!("Error:\n{stderr}\n"));
    }
    if text.is_empty() {
        text.push_str("Command executed successfully (no output)");
    }
    text.push_str(&format!("\nReturn code: {}", result.exit_code));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangerous_commands_are_blocked() {
        for command in ["rm -rf /", "sudo REBOOT", "dd if=/dev/zero of=x", "echo hi > /dev/sda"] {
            let err = check_command_safety(command).expect_err(command);
            assert!(matches!(err, RelayError::Blocked { .. }));
        }
        check_command_safety("ls -la /var/log").expect("harmless");
    }

    #[test]
    fn command_output_lists_streams_and_code() {
        let result = ProcessResult {
            stdout: "a\n".into(),
            stderr: "warn\n".into(),
            exit_code: 2,
            ..ProcessResult::default()
        };
        assert_eq!(
            render_command_output(&result),
            "Output:\na\nError:\nwarn\n\nReturn code: 2"
        );

        let quiet = ProcessResult {
            succeeded: true,
            ..ProcessResult::default()
        };
        assert_eq!(
            render_command_output(&quiet),
            "Command executed successfully (no output)\nReturn code: 0"
        );
    }
}
