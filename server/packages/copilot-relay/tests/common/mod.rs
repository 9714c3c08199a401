#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use copilot_relay::config::RelayConfig;
use copilot_relay::dispatcher::{Dispatcher, Inbound};
use copilot_relay::session::UserId;
use copilot_relay::surface::{ChatSurface, MessageRef, OutboundMessage, SurfaceError, TextFormat};

pub const USER: UserId = UserId(1);

/// Stand-in for the agent binary. Appends `<cwd>|<args>` to a call log and
/// prints a canned transcript; prompts containing `explode` or `slow` fail or
/// hang instead.
const FAKE_AGENT: &str = r#"#!/bin/sh
printf '%s|%s\n' "$PWD" "$*" >> "__CALL_LOG__"
case "$*" in
  *explode*)
    echo "✓ started"
    echo "boom" >&2
    exit 3
    ;;
  *slow*)
    echo "✓ thinking"
    sleep 30
    ;;
esac
echo "✓ Read the task"
echo "$ ls"
echo "↪ 0 files"
echo "All set."
echo ""
echo "Total usage est: 1 Premium request"
echo "Total duration (wall): 1.5s"
"#;

#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    Sent { id: u64, message: OutboundMessage },
    Edited { id: u64, message: OutboundMessage },
    Document { path: PathBuf, caption: String },
    Fetched { file_id: String, dest: PathBuf },
}

impl SurfaceEvent {
    pub fn message(&self) -> Option<&OutboundMessage> {
        match self {
            SurfaceEvent::Sent { message, .. } | SurfaceEvent::Edited { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

/// Surface that records everything and can be told to reject markup.
#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
    next_id: AtomicU64,
    reject_markdown_once: AtomicBool,
    edit_limit: Mutex<Option<usize>>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_next_markdown(&self) {
        self.reject_markdown_once.store(true, Ordering::SeqCst);
    }

    pub fn limit_edits_to(&self, chars: usize) {
        *self.edit_limit.lock().expect("edit limit lock") = Some(chars);
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("events lock").clear();
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.events()
            .iter()
            .filter_map(|event| event.message().cloned())
            .collect()
    }

    pub fn last_message(&self) -> OutboundMessage {
        self.messages().pop().expect("at least one message")
    }

    pub fn all_text(&self) -> String {
        self.messages()
            .into_iter()
            .map(|message| message.text)
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    fn record(&self, event: SurfaceEvent) {
        self.events.lock().expect("events lock").push(event);
    }

    fn check_markup(&self, message: &OutboundMessage) -> Result<(), SurfaceError> {
        if message.format == TextFormat::Markdown
            && self.reject_markdown_once.swap(false, Ordering::SeqCst)
        {
            return Err(SurfaceError::InvalidMarkup("can't parse entities".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatSurface for RecordingSurface {
    async fn send(
        &self,
        chat: UserId,
        message: OutboundMessage,
    ) -> Result<MessageRef, SurfaceError> {
        self.check_markup(&message)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(SurfaceEvent::Sent { id, message });
        Ok(MessageRef { chat, id })
    }

    async fn edit(&self, target: &MessageRef, message: OutboundMessage) -> Result<(), SurfaceError> {
        self.check_markup(&message)?;
        if let Some(limit) = *self.edit_limit.lock().expect("edit limit lock") {
            let length = message.text.chars().count();
            if length > limit {
                return Err(SurfaceError::TooLong { length, limit });
            }
        }
        self.record(SurfaceEvent::Edited {
            id: target.id,
            message,
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: UserId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, SurfaceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(SurfaceEvent::Document {
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(MessageRef { chat, id })
    }

    async fn fetch_file(&self, file_id: &str, dest: &Path) -> Result<u64, SurfaceError> {
        let size = tokio::fs::copy(file_id, dest)
            .await
            .map_err(|err| SurfaceError::Transport(err.to_string()))?;
        self.record(SurfaceEvent::Fetched {
            file_id: file_id.to_string(),
            dest: dest.to_path_buf(),
        });
        Ok(size)
    }
}

pub struct TestRelay {
    pub dispatcher: Dispatcher,
    pub surface: Arc<RecordingSurface>,
    pub root: PathBuf,
    _dir: TempDir,
}

impl TestRelay {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut RelayConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().to_path_buf();
        let agent = install_fake_agent(&root);

        let mut config = RelayConfig {
            agent_binary: agent.display().to_string(),
            workspace_root: root.join("workspaces"),
            progress_throttle_ms: 0,
            ..RelayConfig::default()
        };
        customize(&mut config);

        let surface = RecordingSurface::new();
        let dispatcher = Dispatcher::new(config, surface.clone());
        Self {
            dispatcher,
            surface,
            root,
            _dir: dir,
        }
    }

    pub async fn text(&self, text: &str) {
        self.dispatcher.handle(Inbound::text(USER, text)).await;
    }

    pub async fn button(&self, data: &str) {
        self.dispatcher.handle(Inbound::button(USER, data)).await;
    }

    /// Invocations of the fake agent as `(cwd, args)`.
    pub fn agent_calls(&self) -> Vec<(String, String)> {
        std::fs::read_to_string(self.root.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_once('|'))
            .map(|(cwd, args)| (cwd.to_string(), args.to_string()))
            .collect()
    }

    pub fn agent_workspace(&self) -> PathBuf {
        self.root.join("workspaces").join(format!("copilot_agent_{}", USER))
    }
}

fn install_fake_agent(root: &Path) -> PathBuf {
    let path = root.join("fake-copilot");
    let log = root.join("calls.log");
    let script = FAKE_AGENT.replace("__CALL_LOG__", &log.display().to_string());
    std::fs::write(&path, script).expect("write fake agent");
    let mut permissions = std::fs::metadata(&path).expect("stat fake agent").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod fake agent");
    path
}

pub fn actions(message: &OutboundMessage) -> Vec<String> {
    message
        .keyboard
        .as_ref()
        .map(|keyboard| keyboard.actions().map(str::to_string).collect())
        .unwrap_or_default()
}
