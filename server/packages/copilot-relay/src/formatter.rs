//! Turns a raw agent transcript into structured pieces and renders them for
//! the chat surface.

use std::sync::OnceLock;

use copilot_relay_agent_runner::MILESTONE_GLYPH;
use regress::Regex;
use serde::Serialize;

use crate::config::RenderLimits;

/// Checkmark shown to chat users in place of [`MILESTONE_GLYPH`].
pub const MILESTONE_EMOJI: &str = "✅";

pub const TRUNCATION_SUFFIX: &str = "\n\n...[Response truncated]";

const COMMAND_GLYPH: char = '$';
const OUTPUT_GLYPH: char = '↪';

/// Substrings that open the usage summary at the end of a transcript.
const STATS_HEADERS: [&str; 3] = ["Total usage", "Total duration", "Usage by model"];

const MAX_RESULT_MILESTONES: usize = 8;
const MAX_RESULT_COMMANDS: usize = 5;

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn bold() -> &'static Regex {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    cached(&BOLD, r"\*\*(.+?)\*\*")
}

fn fence_language() -> &'static Regex {
    static FENCE_LANGUAGE: OnceLock<Regex> = OnceLock::new();
    cached(&FENCE_LANGUAGE, r"```\w+\n")
}

fn duration_pattern() -> &'static Regex {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    cached(&DURATION, r"Total duration \(wall\): ([\d.]+s)")
}

fn model_pattern() -> &'static Regex {
    static MODEL: OnceLock<Regex> = OnceLock::new();
    cached(&MODEL, r"\b(?:claude|gpt)-[a-z0-9.-]*[0-9]")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub duration: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedResult {
    pub milestones: Vec<String>,
    pub content: String,
    pub commands: Vec<CommandRecord>,
    pub stats: Option<RunStats>,
}

/// Split a transcript into milestones, executed commands, freeform content
/// and the trailing usage statistics.
///
/// Once a statistics header is seen every following line belongs to the
/// statistics section. A `$` command line is only recorded when the very next
/// line is its `↪` output line; otherwise it is dropped.
pub fn format(transcript: &str) -> FormattedResult {
    let mut milestones = Vec::new();
    let mut content: Vec<&str> = Vec::new();
    let mut commands = Vec::new();
    let mut stats_lines: Vec<&str> = Vec::new();
    let mut in_stats = false;
    let mut pending_command: Option<String> = None;

    for line in transcript.trim().lines() {
        if !in_stats && STATS_HEADERS.iter().any(|header| line.contains(header)) {
            in_stats = true;
        }
        if in_stats {
            stats_lines.push(line);
            continue;
        }

        let trimmed = line.trim();
        if let Some(hint) = trimmed.strip_prefix(OUTPUT_GLYPH) {
            match pending_command.take() {
                Some(command_line) => {
                    let hint = hint.trim();
                    commands.push(CommandRecord {
                        command_line,
                        output_hint: (!hint.is_empty()).then(|| hint.to_string()),
                    });
                }
                None => content.push(line),
            }
            continue;
        }

        if let Some(dropped) = pending_command.take() {
            tracing::debug!(command = %dropped, "dropping command without output line");
        }

        if trimmed.starts_with(MILESTONE_GLYPH) {
            milestones.push(trimmed.to_string());
        } else if let Some(command_line) = trimmed.strip_prefix(COMMAND_GLYPH) {
            pending_command = Some(command_line.trim().to_string());
        } else if !trimmed.is_empty() {
            content.push(line);
        }
    }

    let stats = (!stats_lines.is_empty()).then(|| extract_stats(&stats_lines.join("\n")));

    FormattedResult {
        milestones,
        content: content.join("\n"),
        commands,
        stats,
    }
}

fn extract_stats(stats: &str) -> RunStats {
    let duration = duration_pattern()
        .find(stats)
        .and_then(|found| found.group(1))
        .map(|range| stats[range].to_string());
    let model = model_pattern()
        .find(stats)
        .map(|found| stats[found.range()].to_string());
    RunStats { duration, model }
}

/// Adapt agent markdown to the chat surface's dialect and cap its length.
pub fn render_for_chat(text: &str, cap: usize) -> String {
    let text = substitute_milestone_glyph(text);
    let text = replace_all(bold(), &text, |found| match found.group(1) {
        Some(inner) => format!("*{}*", &text[inner]),
        None => text[found.range()].to_string(),
    });
    let text = replace_all(fence_language(), &text, |_| "```\n".to_string());
    truncate_chars(&text, cap)
}

pub fn substitute_milestone_glyph(text: &str) -> String {
    text.replace(MILESTONE_GLYPH, MILESTONE_EMOJI)
}

/// Cut `text` after `cap` characters and mark it as truncated. Shorter text
/// is returned unchanged.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((index, _)) => format!("{}{}", &text[..index], TRUNCATION_SUFFIX),
        None => text.to_string(),
    }
}

/// Split a long reply on line boundaries into chunks of at most `max_chars`
/// characters. Lines longer than that are split hard.
pub fn split_response(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let mut pieces: Vec<String> = Vec::new();
        let chars: Vec<char> = line.chars().collect();
        if chars.len() > max_chars {
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect()));
        } else {
            pieces.push(line.to_string());
        }

        for piece in pieces {
            let piece_len = piece.chars().count();
            let separator = usize::from(!current.is_empty());
            if current_len + separator + piece_len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Final message for a completed agent task. `live_milestones` are the ones
/// already shown while streaming; when empty the transcript's are used.
pub fn render_agent_result(
    task: &str,
    result: &FormattedResult,
    live_milestones: &[String],
    limits: &RenderLimits,
) -> String {
    let mut text = String::from("✅ *AGENT COMPLETED*\n\n");
    text.push_str(&format!("*Task:* {task}\n\n"));

    let milestones: Vec<String> = if live_milestones.is_empty() {
        result.milestones.clone()
    } else {
        live_milestones.to_vec()
    };
    if !milestones.is_empty() {
        text.push_str("*Actions Completed:*\n");
        for milestone in milestones.iter().take(MAX_RESULT_MILESTONES) {
            text.push_str(&substitute_milestone_glyph(milestone));
            text.push('\n');
        }
        if milestones.len() > MAX_RESULT_MILESTONES {
            text.push_str(&format!(
                "_...and {} more_\n",
                milestones.len() - MAX_RESULT_MILESTONES
            ));
        }
        text.push('\n');
    }

    if !result.commands.is_empty() {
        text.push_str("*Commands Executed:*\n");
        for command in result.commands.iter().take(MAX_RESULT_COMMANDS) {
            text.push_str(&format!("> `$ {}`\n", command.command_line));
            if let Some(hint) = &command.output_hint {
                text.push_str(&format!("> _{hint}_\n"));
            }
        }
        text.push('\n');
    }

    if !result.content.is_empty() {
        text.push_str(&render_for_chat(&result.content, limits.agent_content));
        text.push_str("\n\n");
    }

    if let Some(stats) = &result.stats {
        let mut lines = Vec::new();
        if let Some(duration) = &stats.duration {
            lines.push(format!("⏱️ Completed in: `{duration}`"));
        }
        if let Some(model) = &stats.model {
            lines.push(format!("🤖 Model: `{model}`"));
        }
        text.push_str(&lines.join("\n"));
    }

    text.push_str("\n\n💬 _Just send another message to continue this session_");
    text
}

/// Failure message for an agent task, including whatever progress was made.
pub fn render_agent_failure(task: &str, error: &str, partial: &FormattedResult) -> String {
    let mut text = String::from("❌ *TASK FAILED*\n\n");
    text.push_str(&format!("*Task:* {task}\n\n"));
    if !partial.milestones.is_empty() {
        text.push_str("*Completed before failure:*\n");
        for milestone in &partial.milestones {
            text.push_str(&substitute_milestone_glyph(milestone));
            text.push('\n');
        }
        text.push('\n');
    }
    text.push_str(&format!("*Error:*\n```\n{error}\n```"));
    text
}

fn replace_all(
    regex: &Regex,
    text: &str,
    mut replacement: impl FnMut(&regress::Match) -> String,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for found in regex.find_iter(text) {
        let range = found.range();
        out.push_str(&text[last..range.start]);
        out.push_str(&replacement(&found));
        last = range.end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_milestones_content_and_stats() {
        let result = format("✓ created file\nHello world\nTotal duration (wall): 3.2s");
        assert_eq!(result.milestones, vec!["✓ created file"]);
        assert_eq!(result.content, "Hello world");
        assert!(result.commands.is_empty());
        let stats = result.stats.expect("stats");
        assert_eq!(stats.duration.as_deref(), Some("3.2s"));
        assert_eq!(stats.model, None);
    }

    #[test]
    fn statistics_section_is_sticky() {
        let transcript = "answer\nTotal usage est: 1 Premium request\n✓ not a milestone\nmore text\nUsage by model:\n    claude-sonnet-4.5    7.5k input, 120 output";
        let result = format(transcript);
        assert!(result.milestones.is_empty());
        assert_eq!(result.content, "answer");
        let stats = result.stats.expect("stats");
        assert_eq!(stats.model.as_deref(), Some("claude-sonnet-4.5"));
        assert_eq!(stats.duration, None);
    }

    #[test]
    fn command_pairs_with_immediate_output_line() {
        let transcript = "$ ls -la\n↪ 12 files\n$ cat missing\nNo output captured\n$ python hello.py\n↪ Hello";
        let result = format(transcript);
        assert_eq!(
            result.commands,
            vec![
                CommandRecord {
                    command_line: "ls -la".to_string(),
                    output_hint: Some("12 files".to_string()),
                },
                CommandRecord {
                    command_line: "python hello.py".to_string(),
                    output_hint: Some("Hello".to_string()),
                },
            ]
        );
        assert_eq!(result.content, "No output captured");
    }

    #[test]
    fn command_interrupted_by_milestone_or_blank_is_dropped() {
        let result = format("$ make\n✓ built\n$ make test\n\n↪ ok");
        assert!(result.commands.is_empty());
        assert_eq!(result.milestones, vec!["✓ built"]);
        // An output line with nothing pending is plain content.
        assert_eq!(result.content, "↪ ok");
    }

    #[test]
    fn content_keeps_order_and_indentation() {
        let result = format("first\n✓ step\n    indented code\nlast");
        assert_eq!(result.content, "first\n    indented code\nlast");
    }

    #[test]
    fn no_stats_section_means_no_stats() {
        assert_eq!(format("just text").stats, None);
        assert_eq!(format(""), FormattedResult::default());
    }

    #[test]
    fn chat_rendering_substitutes_markup() {
        let rendered = render_for_chat("✓ done **bold** text\n```python\nprint(1)\n```", 500);
        assert_eq!(rendered, "✅ done *bold* text\n```\nprint(1)\n```");
    }

    #[test]
    fn chat_rendering_is_idempotent() {
        let once = render_for_chat("✓ a **b** ✓ c", 100);
        let twice = render_for_chat(&once, 100);
        assert_eq!(once, twice);
        assert_eq!(twice.matches(MILESTONE_EMOJI).count(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "✅".repeat(10);
        let truncated = truncate_chars(&text, 4);
        assert!(truncated.starts_with(&"✅".repeat(4)));
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(
            truncated.chars().count(),
            4 + TRUNCATION_SUFFIX.chars().count()
        );
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn truncation_bound_holds_for_all_lengths() {
        let source = "ab✓cd\n".repeat(20);
        for cap in 0..source.chars().count() + 2 {
            let out = truncate_chars(&source, cap);
            assert!(out.chars().count() <= cap + TRUNCATION_SUFFIX.chars().count());
            let prefix: String = source.chars().take(cap).collect();
            assert!(out.starts_with(&prefix));
        }
    }

    #[test]
    fn split_response_keeps_lines_together() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_response(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_response(text, 100), vec![text]);
        assert_eq!(split_response("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn agent_result_lists_actions_commands_and_duration() {
        let result = format(
            "✓ Created hello.py\n$ python hello.py\n↪ Hello, world!\nThe script prints a greeting.\nTotal duration (wall): 12.4s",
        );
        let text = render_agent_result("write hello", &result, &[], &RenderLimits::default());
        assert!(text.starts_with("✅ *AGENT COMPLETED*\n\n*Task:* write hello\n\n"));
        assert!(text.contains("*Actions Completed:*\n✅ Created hello.py\n"));
        assert!(text.contains("> `$ python hello.py`\n> _Hello, world!_\n"));
        assert!(text.contains("The script prints a greeting."));
        assert!(text.contains("⏱️ Completed in: `12.4s`"));
        assert!(text.ends_with("_Just send another message to continue this session_"));
    }

    #[test]
    fn agent_result_shows_model_from_usage_summary() {
        let result = format(
            "Done.\nTotal duration (wall): 4.0s\nUsage by model:\n    claude-haiku-4.5    2k input, 50 output",
        );
        let text = render_agent_result("t", &result, &[], &RenderLimits::default());
        assert!(text.contains("⏱️ Completed in: `4.0s`\n🤖 Model: `claude-haiku-4.5`\n\n💬"));

        let without_model = render_agent_result(
            "t",
            &format("Done.\nTotal duration (wall): 4.0s"),
            &[],
            &RenderLimits::default(),
        );
        assert!(!without_model.contains("Model:"));
    }

    #[test]
    fn agent_result_caps_listed_actions() {
        let transcript: String = (1..=10).map(|i| format!("✓ step {i}\n")).collect();
        let text = render_agent_result("t", &format(&transcript), &[], &RenderLimits::default());
        assert!(text.contains("✅ step 8\n"));
        assert!(!text.contains("✅ step 9\n"));
        assert!(text.contains("_...and 2 more_"));
    }

    #[test]
    fn failure_shows_progress_and_error() {
        let partial = format("✓ cloned repo\nworking...");
        let text = render_agent_failure("fix build", "command timed out after 180 seconds", &partial);
        assert!(text.contains("✅ cloned repo"));
        assert!(text.contains("```\ncommand timed out after 180 seconds\n```"));
    }
}
