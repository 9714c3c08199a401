use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    LaunchFailure,
    Timeout,
    NonZeroExit,
    FormattingFailure,
    ResourceLimit,
    SessionBusy,
    Blocked,
    Workspace,
    Surface,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LaunchFailure => "launch_failure",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non_zero_exit",
            Self::FormattingFailure => "formatting_failure",
            Self::ResourceLimit => "resource_limit",
            Self::SessionBusy => "session_busy",
            Self::Blocked => "blocked",
            Self::Workspace => "workspace",
            Self::Surface => "surface",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::LaunchFailure => "Launch Failed",
            Self::Timeout => "Timed Out",
            Self::NonZeroExit => "Task Failed",
            Self::FormattingFailure => "Formatting Failed",
            Self::ResourceLimit => "Not Allowed",
            Self::SessionBusy => "Session Busy",
            Self::Blocked => "Blocked",
            Self::Workspace => "Workspace Error",
            Self::Surface => "Delivery Failed",
        }
    }

    /// Failures that end the current request but leave session state untouched.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Self::ResourceLimit | Self::Blocked | Self::SessionBusy
        )
    }
}

/// Serializable summary of a [`RelayError`], suitable for structured logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub type_: ErrorType,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to launch `{command}`: {message}")]
    Launch { command: String, message: String },
    #[error("command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
    #[error("{message}")]
    NonZeroExit {
        exit_code: i32,
        message: String,
    },
    #[error("formatting failed: {message}")]
    Formatting { message: String },
    #[error("file too large: {size} bytes (maximum {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("path not found: {path}")]
    PathNotFound { path: String },
    #[error("path is a directory: {path}")]
    PathIsDirectory { path: String },
    #[error("the {mode} session is busy with another request")]
    SessionBusy { mode: String },
    #[error("blocked: {reason}")]
    Blocked { reason: String },
    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("chat surface error: {message}")]
    Surface { message: String },
}

impl RelayError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Launch { .. } => ErrorType::LaunchFailure,
            Self::Timeout { .. } => ErrorType::Timeout,
            Self::NonZeroExit { .. } => ErrorType::NonZeroExit,
            Self::Formatting { .. } => ErrorType::FormattingFailure,
            Self::FileTooLarge { .. }
            | Self::PathNotFound { .. }
            | Self::PathIsDirectory { .. } => ErrorType::ResourceLimit,
            Self::SessionBusy { .. } => ErrorType::SessionBusy,
            Self::Blocked { .. } => ErrorType::Blocked,
            Self::Workspace { .. } => ErrorType::Workspace,
            Self::Surface { .. } => ErrorType::Surface,
        }
    }

    pub fn workspace(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Message shown to the chat user. Backticks are replaced so the text can
    /// be embedded in a code block without breaking markup.
    pub fn user_message(&self) -> String {
        redact_markup(&self.to_string())
    }

    pub fn to_report(&self) -> ErrorReport {
        let details = match self {
            Self::Launch { command, .. } => {
                let mut map = Map::new();
                map.insert("command".to_string(), Value::String(command.clone()));
                Some(Value::Object(map))
            }
            Self::NonZeroExit { exit_code, .. } => {
                let mut map = Map::new();
                map.insert(
                    "exitCode".to_string(),
                    Value::Number(serde_json::Number::from(*exit_code as i64)),
                );
                Some(Value::Object(map))
            }
            Self::FileTooLarge { size, limit } => {
                let mut map = Map::new();
                map.insert("size".to_string(), Value::Number((*size).into()));
                map.insert("limit".to_string(), Value::Number((*limit).into()));
                Some(Value::Object(map))
            }
            Self::PathNotFound { path } | Self::PathIsDirectory { path } => {
                let mut map = Map::new();
                map.insert("path".to_string(), Value::String(path.clone()));
                Some(Value::Object(map))
            }
            Self::SessionBusy { mode } => {
                let mut map = Map::new();
                map.insert("mode".to_string(), Value::String(mode.clone()));
                Some(Value::Object(map))
            }
            Self::Timeout { .. }
            | Self::Formatting { .. }
            | Self::Blocked { .. }
            | Self::Workspace { .. }
            | Self::Surface { .. } => None,
        };

        let error_type = self.error_type();
        ErrorReport {
            type_: error_type,
            title: error_type.title().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<RelayError> for ErrorReport {
    fn from(value: RelayError) -> Self {
        value.to_report()
    }
}

impl From<&RelayError> for ErrorReport {
    fn from(value: &RelayError) -> Self {
        value.to_report()
    }
}

/// Strip characters that would break a markdown code span or block.
pub fn redact_markup(text: &str) -> String {
    text.replace('`', "'")
}
