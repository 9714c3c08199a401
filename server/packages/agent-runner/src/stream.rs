use std::io;
use std::process::Stdio;
use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};

use crate::process::{
    feed_affirmations, shell_command, spawn, stdin_mode, terminate, ProcessResult, RunRequest,
};

/// Leading glyph the agent uses for a completed step.
pub const MILESTONE_GLYPH: char = '✓';

/// Prefixes of the usage summary the agent prints after its answer.
const STATS_PREFIXES: [&str; 2] = ["Total", "Usage by"];

/// One classified output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum StreamEvent {
    Milestone(String),
    Content(String),
}

/// Classify a single output line. `None` means the line is kept in the
/// transcript but not forwarded (blank or part of the usage summary).
pub fn classify_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.starts_with(MILESTONE_GLYPH) {
        return Some(StreamEvent::Milestone(trimmed.to_string()));
    }
    if trimmed.is_empty() || STATS_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return None;
    }
    Some(StreamEvent::Content(trimmed.to_string()))
}

/// Shell prelude that points stderr at the stdout pipe, so both streams reach
/// the reader in the order the process wrote them.
const MERGE_STDERR: &str = "exec 2>&1\n";

/// Run `sh -c <command>` and forward every classified line to `sink` while it
/// is being produced. stderr shares the stdout pipe; the returned transcript
/// lives in `stdout`.
///
/// The overall timeout covers reading and exit. On expiry the process group
/// is killed and the lines read so far are returned with `timed_out` set.
/// A dropped receiver does not stop the run.
pub async fn stream_run(request: &RunRequest, sink: mpsc::Sender<StreamEvent>) -> ProcessResult {
    let started = Instant::now();
    let deadline = tokio::time::Instant::from_std(started + request.timeout);

    let merged = format!("{MERGE_STDERR}{}", request.command);
    let mut command = shell_command(&merged, request.working_dir.as_deref());
    command
        .stdin(stdin_mode(request.affirmations))
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match spawn(&mut command, &request.command) {
        Ok(child) => child,
        Err(result) => return result,
    };
    let pid = child.id().unwrap_or(0);

    if let Some(count) = request.affirmations {
        feed_affirmations(child.stdin.take(), count);
    }

    let Some(stdout) = child.stdout.take() else {
        terminate(&mut child).await;
        return ProcessResult::launch_failure("failed to capture subprocess output");
    };
    let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'));

    let mut transcript = Transcript::default();
    if read_lines(&mut lines, deadline, &sink, &mut transcript, pid).await == ReadEnd::TimedOut {
        tracing::warn!(
            pid,
            lines = transcript.lines.len(),
            timeout_ms = request.timeout.as_millis() as u64,
            "streamed process timed out, killing"
        );
        terminate(&mut child).await;
        return transcript.timed_out(request);
    }

    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            tracing::error!(pid, error = %err, "failed to wait for streamed process");
            terminate(&mut child).await;
            return ProcessResult {
                succeeded: false,
                exit_code: -1,
                stdout: transcript.lines.join("\n"),
                error: Some(err.to_string()),
                milestones: transcript.milestones,
                ..ProcessResult::default()
            };
        }
        Err(_) => {
            terminate(&mut child).await;
            return transcript.timed_out(request);
        }
    };

    tracing::info!(
        pid,
        exit_code = status.code(),
        lines = transcript.lines.len(),
        milestones = transcript.milestones.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "streamed process exited"
    );

    ProcessResult {
        succeeded: status.success(),
        exit_code: status.code().unwrap_or(-1),
        stdout: transcript.lines.join("\n"),
        milestones: transcript.milestones,
        ..ProcessResult::default()
    }
}

#[derive(Debug, Default)]
struct Transcript {
    lines: Vec<String>,
    milestones: Vec<String>,
}

impl Transcript {
    fn timed_out(self, request: &RunRequest) -> ProcessResult {
        ProcessResult {
            error: Some("Command timed out".to_string()),
            milestones: self.milestones,
            ..ProcessResult::timeout(request.timeout, self.lines.join("\n"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// End of output, or the pipe failed and nothing more can be read.
    Closed,
    TimedOut,
}

/// Record and forward lines until the stream ends, fails, or `deadline`
/// passes.
async fn read_lines<S>(
    lines: &mut S,
    deadline: tokio::time::Instant,
    sink: &mpsc::Sender<StreamEvent>,
    transcript: &mut Transcript,
    pid: u32,
) -> ReadEnd
where
    S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    let mut sink_open = true;
    loop {
        let bytes = match tokio::time::timeout_at(deadline, lines.next()).await {
            Err(_) => return ReadEnd::TimedOut,
            Ok(None) => return ReadEnd::Closed,
            Ok(Some(Err(err))) => {
                tracing::warn!(pid, error = %err, "failed to read process output, stopping");
                return ReadEnd::Closed;
            }
            Ok(Some(Ok(bytes))) => bytes,
        };

        let decoded = String::from_utf8_lossy(&bytes);
        let line = decoded.trim_end().to_string();
        let event = classify_line(&line);
        transcript.lines.push(line);

        let Some(event) = event else {
            continue;
        };
        if let StreamEvent::Milestone(text) = &event {
            transcript.milestones.push(text.clone());
        }
        if sink_open && sink.send(event).await.is_err() {
            tracing::debug!(pid, "stream consumer dropped, continuing without it");
            sink_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn milestone_lines_are_trimmed() {
        assert_eq!(
            classify_line("  ✓ Created hello.py  "),
            Some(StreamEvent::Milestone("✓ Created hello.py".to_string()))
        );
    }

    #[test]
    fn blank_and_usage_lines_are_suppressed() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("   "), None);
        assert_eq!(classify_line("Total usage est: 1 Premium request"), None);
        assert_eq!(classify_line("Usage by model:"), None);
    }

    #[test]
    fn everything_else_is_content() {
        assert_eq!(
            classify_line("  Here is the script:"),
            Some(StreamEvent::Content("Here is the script:".to_string()))
        );
        assert_eq!(
            classify_line("$ python hello.py"),
            Some(StreamEvent::Content("$ python hello.py".to_string()))
        );
    }

    #[tokio::test]
    async fn read_error_ends_the_stream() {
        let output: Vec<io::Result<Vec<u8>>> =
            vec![Ok("✓ first".as_bytes().to_vec()), Ok(b"second".to_vec())];
        let healthy = tokio_stream::iter(output);
        let broken = tokio_stream::iter(std::iter::repeat_with(|| {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe failed"))
        }));
        let mut lines = healthy.chain(broken);
        let (tx, mut rx) = mpsc::channel(8);
        let mut transcript = Transcript::default();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);

        let started = Instant::now();
        let end = read_lines(&mut lines, deadline, &tx, &mut transcript, 0).await;

        assert_eq!(end, ReadEnd::Closed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transcript.lines, vec!["✓ first", "second"]);
        assert_eq!(transcript.milestones, vec!["✓ first"]);
        drop(tx);
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Milestone("✓ first".to_string()))
        );
        assert_eq!(rx.recv().await, Some(StreamEvent::Content("second".to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
