//! Live progress for a running agent task.
//!
//! The multiplexer produces [`StreamEvent`]s on a channel; [`pump`] drains it,
//! lets a [`ProgressReporter`] decide which events warrant a display update,
//! and edits the status message in place.

use std::time::Duration;

use copilot_relay_agent_runner::StreamEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::formatter::substitute_milestone_glyph;
use crate::surface::{ChatSurface, MessageRef, OutboundMessage, SurfaceError};

const VISIBLE_MILESTONES: usize = 5;
const PREVIEW_CHARS: usize = 100;

#[derive(Debug)]
pub struct ProgressReporter {
    task: String,
    throttle: Duration,
    milestones: Vec<String>,
    latest_content: Option<String>,
}

impl ProgressReporter {
    pub fn new(task: impl Into<String>, throttle: Duration) -> Self {
        Self {
            task: task.into(),
            throttle,
            milestones: Vec::new(),
            latest_content: None,
        }
    }

    /// Record `event` and return the text to display when an update is due.
    /// Milestones always produce one; content only once `since_last_push`
    /// reaches the throttle interval.
    pub fn on_event(&mut self, event: StreamEvent, since_last_push: Duration) -> Option<String> {
        match event {
            StreamEvent::Milestone(milestone) => {
                self.milestones.push(milestone);
                Some(self.render())
            }
            StreamEvent::Content(content) => {
                self.latest_content = Some(content);
                (since_last_push >= self.throttle).then(|| self.render())
            }
        }
    }

    pub fn milestones(&self) -> &[String] {
        &self.milestones
    }

    pub fn into_milestones(self) -> Vec<String> {
        self.milestones
    }

    pub fn render(&self) -> String {
        let mut text = String::from("🤖 *Agent Working...*\n\n");
        text.push_str(&format!("*Task:* {}\n\n", self.task));

        if !self.milestones.is_empty() {
            text.push_str("*Progress:*\n");
            let hidden = self.milestones.len().saturating_sub(VISIBLE_MILESTONES);
            if hidden > 0 {
                text.push_str(&format!("_...and {hidden} more actions_\n"));
            }
            for milestone in &self.milestones[hidden..] {
                text.push_str(&substitute_milestone_glyph(milestone));
                text.push('\n');
            }
            text.push('\n');
        }

        if let Some(content) = &self.latest_content {
            let preview = truncate_preview(content);
            text.push_str(&format!("💭 _{preview}_\n\n"));
        }

        text.push_str("⏳ _Working..._");
        text
    }
}

fn truncate_preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((index, _)) => format!("{}...", &content[..index]),
        None => content.to_string(),
    }
}

/// Drain `events` into display updates on `target` until the producer side
/// closes, then hand the reporter back for the final rendering.
///
/// Unchanged-content edits are ignored; any other surface failure is logged
/// and the stream keeps going.
pub async fn pump(
    mut events: mpsc::Receiver<StreamEvent>,
    mut reporter: ProgressReporter,
    surface: &dyn ChatSurface,
    target: &MessageRef,
) -> ProgressReporter {
    let mut last_push = Instant::now();
    while let Some(event) = events.recv().await {
        let Some(text) = reporter.on_event(event, last_push.elapsed()) else {
            continue;
        };
        // Failed pushes reset the throttle too.
        last_push = Instant::now();
        match surface.edit(target, OutboundMessage::markdown(text)).await {
            Ok(()) | Err(SurfaceError::NotModified) => {}
            Err(err) => {
                tracing::warn!(
                    chat = %target.chat,
                    message_id = target.id,
                    error = %err,
                    "failed to push progress update"
                );
            }
        }
    }
    reporter
}

#[cfg(test)]
mod tests {
    use super::*;

    const THROTTLE: Duration = Duration::from_secs(2);

    #[test]
    fn milestones_push_immediately() {
        let mut reporter = ProgressReporter::new("build it", THROTTLE);
        let update = reporter
            .on_event(StreamEvent::Milestone("✓ created file".into()), Duration::ZERO)
            .expect("milestone pushes");
        assert!(update.contains("*Task:* build it"));
        assert!(update.contains("✅ created file"));
    }

    #[test]
    fn content_is_throttled() {
        let mut reporter = ProgressReporter::new("t", THROTTLE);
        assert!(reporter
            .on_event(StreamEvent::Content("thinking".into()), Duration::from_millis(500))
            .is_none());
        let update = reporter
            .on_event(StreamEvent::Content("still thinking".into()), Duration::from_secs(2))
            .expect("throttle elapsed");
        assert!(update.contains("💭 _still thinking_"));
    }

    #[test]
    fn buffered_content_shows_with_next_milestone() {
        let mut reporter = ProgressReporter::new("t", THROTTLE);
        reporter.on_event(StreamEvent::Content("reading files".into()), Duration::ZERO);
        let update = reporter
            .on_event(StreamEvent::Milestone("✓ read".into()), Duration::ZERO)
            .expect("milestone pushes");
        assert!(update.contains("reading files"));
    }

    #[test]
    fn only_last_five_milestones_are_listed() {
        let mut reporter = ProgressReporter::new("t", THROTTLE);
        let mut last = None;
        for step in 1..=7 {
            last = reporter.on_event(StreamEvent::Milestone(format!("✓ step {step}")), Duration::ZERO);
        }
        let update = last.expect("update");
        assert!(update.contains("_...and 2 more actions_"));
        assert!(!update.contains("step 2\n"));
        assert!(update.contains("✅ step 3\n"));
        assert!(update.contains("✅ step 7\n"));
        assert_eq!(reporter.milestones().len(), 7);
    }

    #[test]
    fn preview_is_capped() {
        let mut reporter = ProgressReporter::new("t", THROTTLE);
        let long = "x".repeat(150);
        let update = reporter
            .on_event(StreamEvent::Content(long), THROTTLE)
            .expect("update");
        assert!(update.contains(&format!("_{}..._", "x".repeat(100))));
        assert!(!update.contains(&"x".repeat(101)));
    }
}
