use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ModelId;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Character caps applied when rendering replies for the chat surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderLimits {
    pub agent_content: usize,
    pub chat: usize,
    pub suggest: usize,
    pub command_output: usize,
    pub message_chunk: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            agent_content: 1800,
            chat: 3500,
            suggest: 3000,
            command_output: 3800,
            message_chunk: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// Agent executable, resolved through `PATH` by the shell.
    pub agent_binary: String,
    /// Parent directory of the per-user agent and chat workspaces.
    pub workspace_root: PathBuf,
    pub default_model: ModelId,
    pub default_auto_approve: bool,
    pub agent_timeout_secs: u64,
    pub chat_timeout_secs: u64,
    pub suggest_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub progress_throttle_ms: u64,
    pub auto_approve_affirmations: usize,
    pub max_upload_bytes: u64,
    pub max_download_bytes: u64,
    pub limits: RenderLimits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent_binary: "copilot".to_string(),
            workspace_root: std::env::temp_dir(),
            default_model: ModelId::default(),
            default_auto_approve: true,
            agent_timeout_secs: 180,
            chat_timeout_secs: 60,
            suggest_timeout_secs: 60,
            command_timeout_secs: 60,
            status_timeout_secs: 5,
            progress_throttle_ms: 2000,
            auto_approve_affirmations: 6,
            max_upload_bytes: 20 * MIB,
            max_download_bytes: 500 * MIB,
            limits: RenderLimits::default(),
        }
    }
}

impl RelayConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Default config location, `<config dir>/copilot-relay/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("copilot-relay").join("config.json"))
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn suggest_timeout(&self) -> Duration {
        Duration::from_secs(self.suggest_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms)
    }
}
