//! Boundary to the chat platform. The relay only ever talks to users through
//! a [`ChatSurface`]; concrete transports live outside this crate (the
//! console harness in [`crate::console`] is the one shipped here).

use std::path::Path;

use async_trait::async_trait;
use copilot_relay_error::RelayError;
use serde::Serialize;
use thiserror::Error;

use crate::formatter::split_response;
use crate::session::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    Markdown,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    /// Callback payload delivered back as an inbound button press.
    pub action: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// Rows of buttons attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|button| button.action.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    pub format: TextFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

impl OutboundMessage {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Markdown,
            keyboard: None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    fn as_plain(&self) -> Self {
        Self {
            format: TextFormat::Plain,
            ..self.clone()
        }
    }
}

/// Handle to a message already shown to the user, used for in-place edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MessageRef {
    pub chat: UserId,
    pub id: u64,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Edit with identical content. Harmless.
    #[error("message is not modified")]
    NotModified,
    #[error("surface rejected markup: {0}")]
    InvalidMarkup(String),
    #[error("message too long ({length} > {limit})")]
    TooLong { length: usize, limit: usize },
    #[error("surface transport failed: {0}")]
    Transport(String),
}

impl From<SurfaceError> for RelayError {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::InvalidMarkup(message) => RelayError::Formatting { message },
            other => RelayError::Surface {
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn send(&self, chat: UserId, message: OutboundMessage)
        -> Result<MessageRef, SurfaceError>;

    async fn edit(&self, target: &MessageRef, message: OutboundMessage)
        -> Result<(), SurfaceError>;

    async fn send_document(
        &self,
        chat: UserId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, SurfaceError>;

    /// Download an uploaded file into `dest`, returning the byte count.
    async fn fetch_file(&self, file_id: &str, dest: &Path) -> Result<u64, SurfaceError>;
}

/// Send a message, resending it as plain text when the surface rejects the
/// markup. Text longer than `chunk` characters goes out in several messages;
/// only the last carries the keyboard.
pub async fn deliver(
    surface: &dyn ChatSurface,
    chat: UserId,
    message: OutboundMessage,
    chunk: usize,
) -> Result<MessageRef, SurfaceError> {
    let mut chunks = split_response(&message.text, chunk);
    let last = chunks.pop().unwrap_or_default();
    for text in chunks {
        let part = OutboundMessage {
            text,
            format: message.format,
            keyboard: None,
        };
        send_degrading(surface, chat, part).await?;
    }
    send_degrading(
        surface,
        chat,
        OutboundMessage {
            text: last,
            ..message
        },
    )
    .await
}

/// Replace the content of `target`. Falls back to [`deliver`] for text that
/// does not fit in one message; an unchanged edit is treated as success.
pub async fn replace(
    surface: &dyn ChatSurface,
    target: &MessageRef,
    message: OutboundMessage,
    chunk: usize,
) -> Result<(), SurfaceError> {
    if message.text.chars().count() > chunk {
        deliver(surface, target.chat, message, chunk).await?;
        return Ok(());
    }
    match surface.edit(target, message.clone()).await {
        Ok(()) | Err(SurfaceError::NotModified) => Ok(()),
        Err(SurfaceError::InvalidMarkup(reason)) => {
            tracing::warn!(reason = %reason, "markup rejected, editing as plain text");
            match surface.edit(target, message.as_plain()).await {
                Ok(()) | Err(SurfaceError::NotModified) => Ok(()),
                Err(err) => Err(err),
            }
        }
        Err(SurfaceError::TooLong { .. }) => {
            deliver(surface, target.chat, message, chunk).await.map(|_| ())
        }
        Err(err) => Err(err),
    }
}

async fn send_degrading(
    surface: &dyn ChatSurface,
    chat: UserId,
    message: OutboundMessage,
) -> Result<MessageRef, SurfaceError> {
    match surface.send(chat, message.clone()).await {
        Err(SurfaceError::InvalidMarkup(reason)) if message.format == TextFormat::Markdown => {
            tracing::warn!(chat = %chat, reason = %reason, "markup rejected, resending as plain text");
            surface.send(chat, message.as_plain()).await
        }
        other => other,
    }
}
