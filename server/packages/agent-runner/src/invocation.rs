use std::path::PathBuf;

/// Command line for one call of the external agent binary.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    binary: String,
    prompt: String,
    model: Option<String>,
    continue_session: bool,
    allow_all: bool,
    workspace: Option<PathBuf>,
}

impl AgentInvocation {
    pub fn new(binary: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            prompt: prompt.into(),
            model: None,
            continue_session: false,
            allow_all: false,
            workspace: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Resume the most recent agent conversation in the workspace.
    pub fn continue_session(mut self, continue_session: bool) -> Self {
        self.continue_session = continue_session;
        self
    }

    /// Grant the agent every tool and path without interactive prompts.
    pub fn allow_all(mut self, allow_all: bool) -> Self {
        self.allow_all = allow_all;
        self
    }

    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Render the shell command line, e.g.
    /// `cd '/tmp/ws' && copilot --continue -p 'hi' --model gpt-5 --allow-all-tools --allow-all-paths`.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::new();
        parts.push(self.binary.clone());
        if self.continue_session {
            parts.push("--continue".to_string());
        }
        parts.push("-p".to_string());
        parts.push(shell_quote(&self.prompt));
        if let Some(model) = &self.model {
            parts.push("--model".to_string());
            parts.push(shell_quote(model));
        }
        if self.allow_all {
            parts.push("--allow-all-tools".to_string());
            parts.push("--allow-all-paths".to_string());
        }
        let invocation = parts.join(" ");

        match &self.workspace {
            Some(workspace) => format!(
                "cd {} && {}",
                shell_quote(workspace.to_string_lossy().as_ref()),
                invocation
            ),
            None => invocation,
        }
    }
}

pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_agent_task_command_line() {
        let line = AgentInvocation::new("copilot", "build a scraper")
            .model("claude-sonnet-4.5")
            .allow_all(true)
            .workspace("/tmp/copilot_agent_7")
            .command_line();
        assert_eq!(
            line,
            "cd '/tmp/copilot_agent_7' && copilot -p 'build a scraper' --model 'claude-sonnet-4.5' --allow-all-tools --allow-all-paths"
        );
    }

    #[test]
    fn continued_chat_has_no_tool_flags() {
        let line = AgentInvocation::new("copilot", "and then?")
            .model("gpt-5")
            .continue_session(true)
            .command_line();
        assert_eq!(line, "copilot --continue -p 'and then?' --model 'gpt-5'");
    }

    #[test]
    fn prompt_quotes_are_escaped() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        let line = AgentInvocation::new("copilot", "say \"hi\" && rm x").command_line();
        assert_eq!(line, "copilot -p 'say \"hi\" && rm x'");
    }
}
