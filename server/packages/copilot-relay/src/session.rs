//! Session registry: which users have a live agent or chat context, where its
//! workspace lives, and the per-user preferences that outlive a reset.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use copilot_relay_error::RelayError;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Independent session namespaces. A user may hold one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Task execution with tools enabled.
    Agent,
    /// Conversation only.
    Chat,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Agent => "agent",
            SessionMode::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub model: ModelId,
    pub auto_approve: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            model: ModelId::default(),
            auto_approve: true,
        }
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    active: bool,
    busy: Arc<Mutex<()>>,
}

/// Exclusive right to run one subprocess in a session's workspace. Dropping
/// the lease lets the next request for the same session through.
#[derive(Debug)]
pub struct SessionLease {
    workspace: PathBuf,
    is_new: bool,
    _busy: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// `false` when this request continues an earlier conversation.
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    root: PathBuf,
    defaults: UserPreferences,
    sessions: Mutex<HashMap<(SessionMode, UserId), SessionSlot>>,
    preferences: Mutex<HashMap<UserId, UserPreferences>>,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>, defaults: UserPreferences) -> Self {
        Self {
            root: root.into(),
            defaults,
            sessions: Mutex::new(HashMap::new()),
            preferences: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspace_path(&self, mode: SessionMode, user: UserId) -> PathBuf {
        self.root.join(format!("copilot_{}_{}", mode.as_str(), user))
    }

    /// Continue the user's session when asked to and one is active, otherwise
    /// start fresh in a (re)created workspace. Fails with
    /// [`RelayError::SessionBusy`] while another request holds the session.
    ///
    /// The registry lock is only held to claim the session; workspace I/O runs
    /// under the session's own busy guard.
    pub async fn begin_or_continue(
        &self,
        mode: SessionMode,
        user: UserId,
        continue_requested: bool,
    ) -> Result<SessionLease, RelayError> {
        let (busy, active) = self.claim(mode, user).await?;
        let workspace = self.workspace_path(mode, user);
        let is_new = open_workspace(&workspace, continue_requested && active).await?;

        if is_new {
            if let Some(slot) = self.sessions.lock().await.get_mut(&(mode, user)) {
                slot.active = true;
            }
            tracing::info!(
                user = %user,
                mode = mode.as_str(),
                workspace = %workspace.display(),
                "starting new session"
            );
        } else {
            tracing::debug!(user = %user, mode = mode.as_str(), "continuing session");
        }

        Ok(SessionLease {
            workspace,
            is_new,
            _busy: busy,
        })
    }

    /// Take the session's busy guard and read its active flag.
    async fn claim(
        &self,
        mode: SessionMode,
        user: UserId,
    ) -> Result<(OwnedMutexGuard<()>, bool), RelayError> {
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.entry((mode, user)).or_default();
        let busy = slot
            .busy
            .clone()
            .try_lock_owned()
            .map_err(|_| RelayError::SessionBusy {
                mode: mode.as_str().to_string(),
            })?;
        Ok((busy, slot.active))
    }

    pub async fn is_active(&self, mode: SessionMode, user: UserId) -> bool {
        self.sessions
            .lock()
            .await
            .get(&(mode, user))
            .map(|slot| slot.active)
            .unwrap_or(false)
    }

    /// Mark the session inactive and delete its workspace. Deletion errors are
    /// logged and ignored. A running subprocess is not interrupted.
    pub async fn reset(&self, mode: SessionMode, user: UserId) {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(slot) = sessions.get_mut(&(mode, user)) {
                slot.active = false;
            }
        }

        let workspace = self.workspace_path(mode, user);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    user = %user,
                    workspace = %workspace.display(),
                    error = %err,
                    "failed to remove session workspace"
                );
            }
        }
        tracing::info!(user = %user, mode = mode.as_str(), "session reset");
    }

    /// Create the workspace without touching the session flag, e.g. to stage
    /// an uploaded file before the first task.
    pub async fn ensure_workspace(
        &self,
        mode: SessionMode,
        user: UserId,
    ) -> Result<PathBuf, RelayError> {
        let workspace = self.workspace_path(mode, user);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|err| RelayError::workspace(workspace.display().to_string(), err))?;
        Ok(workspace)
    }

    pub async fn preferences(&self, user: UserId) -> UserPreferences {
        self.preferences
            .lock()
            .await
            .get(&user)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub async fn set_model(&self, user: UserId, model: ModelId) {
        let mut preferences = self.preferences.lock().await;
        preferences
            .entry(user)
            .or_insert_with(|| self.defaults.clone())
            .model = model;
    }

    /// Flip auto-approve and return the new value.
    pub async fn toggle_auto_approve(&self, user: UserId) -> bool {
        let mut preferences = self.preferences.lock().await;
        let entry = preferences
            .entry(user)
            .or_insert_with(|| self.defaults.clone());
        entry.auto_approve = !entry.auto_approve;
        entry.auto_approve
    }
}

/// Reuse `workspace` when resuming and it still exists, otherwise create it.
/// Returns whether the session starts fresh.
async fn open_workspace(workspace: &Path, resume: bool) -> Result<bool, RelayError> {
    if resume && tokio::fs::metadata(workspace).await.is_ok() {
        return Ok(false);
    }
    tokio::fs::create_dir_all(workspace)
        .await
        .map_err(|err| RelayError::workspace(workspace.display().to_string(), err))?;
    Ok(true)
}
