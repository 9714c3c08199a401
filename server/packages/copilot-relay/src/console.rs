//! Terminal harness: a [`ChatSurface`] that prints to a writer and a parser
//! for console input lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dispatcher::{Inbound, InboundKind, UploadedFile};
use crate::session::UserId;
use crate::surface::{ChatSurface, Keyboard, MessageRef, OutboundMessage, SurfaceError};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Inbound(InboundKind),
    Quit,
    Empty,
}

/// Parse a console line. `/upload` resolves the file size from disk so the
/// upload ceiling applies as it would for a real surface.
pub fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/quit" | "/exit" => ConsoleCommand::Quit,
        "/start" => ConsoleCommand::Inbound(InboundKind::Start),
        "/menu" => ConsoleCommand::Inbound(InboundKind::Button("menu".to_string())),
        "/button" if !rest.is_empty() => {
            ConsoleCommand::Inbound(InboundKind::Button(rest.to_string()))
        }
        "/upload" if !rest.is_empty() => {
            let path = PathBuf::from(rest);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| rest.to_string());
            let size = std::fs::metadata(&path).ok().map(|meta| meta.len());
            ConsoleCommand::Inbound(InboundKind::File(UploadedFile {
                file_id: rest.to_string(),
                name,
                size,
            }))
        }
        _ => ConsoleCommand::Inbound(InboundKind::Text(line.to_string())),
    }
}

pub fn inbound(user: UserId, command: ConsoleCommand) -> Option<Inbound> {
    match command {
        ConsoleCommand::Inbound(kind) => Some(Inbound { user, kind }),
        ConsoleCommand::Quit | ConsoleCommand::Empty => None,
    }
}

pub struct ConsoleSurface {
    out: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicU64,
}

impl ConsoleSurface {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn print(&self, header: &str, message: &OutboundMessage) -> Result<(), SurfaceError> {
        let mut rendered = format!("{header}\n{}\n", message.text);
        if let Some(keyboard) = message.keyboard.as_ref().filter(|k| !k.is_empty()) {
            rendered.push_str(&render_keyboard(keyboard));
        }
        self.write(&rendered)
    }

    fn write(&self, text: &str) -> Result<(), SurfaceError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| SurfaceError::Transport("console writer poisoned".to_string()))?;
        out.write_all(text.as_bytes())
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush())
            .map_err(|err| SurfaceError::Transport(err.to_string()))
    }
}

fn render_keyboard(keyboard: &Keyboard) -> String {
    let mut text = String::new();
    for row in &keyboard.rows {
        let buttons: Vec<String> = row
            .iter()
            .map(|button| format!("[{} → /button {}]", button.label, button.action))
            .collect();
        text.push_str(&buttons.join("  "));
        text.push('\n');
    }
    text
}

#[async_trait]
impl ChatSurface for ConsoleSurface {
    async fn send(
        &self,
        chat: UserId,
        message: OutboundMessage,
    ) -> Result<MessageRef, SurfaceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.print(&format!("── #{id} ──"), &message)?;
        Ok(MessageRef { chat, id })
    }

    async fn edit(&self, target: &MessageRef, message: OutboundMessage) -> Result<(), SurfaceError> {
        self.print(&format!("── #{} (edited) ──", target.id), &message)
    }

    async fn send_document(
        &self,
        chat: UserId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, SurfaceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write(&format!(
            "── #{id} (document) ──\n{}\n{caption}\n",
            path.display()
        ))?;
        Ok(MessageRef { chat, id })
    }

    /// Console uploads are local paths; the file is copied into place.
    async fn fetch_file(&self, file_id: &str, dest: &Path) -> Result<u64, SurfaceError> {
        tokio::fs::copy(file_id, dest)
            .await
            .map_err(|err| SurfaceError::Transport(format!("copy {file_id}: {err}")))
    }
}
