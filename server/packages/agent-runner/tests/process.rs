use std::time::{Duration, Instant};

use copilot_relay_agent_runner::{run, stream_run, RunRequest, StreamEvent};
use tokio::sync::mpsc;

async fn stream_collect(request: RunRequest) -> (copilot_relay_agent_runner::ProcessResult, Vec<StreamEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    let result = stream_run(&request, tx).await;
    let events = collector.await.expect("collector task");
    (result, events)
}

#[tokio::test]
async fn run_captures_stdout_and_stderr_separately() {
    let result = run(&RunRequest::new("echo out; echo err 1>&2")).await;
    assert!(result.succeeded);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert!(!result.timed_out);
}

#[tokio::test]
async fn run_reports_non_zero_exit() {
    let result = run(&RunRequest::new("echo nope 1>&2; exit 4")).await;
    assert!(!result.succeeded);
    assert_eq!(result.exit_code, 4);
    assert_eq!(result.stderr.trim(), "nope");
    assert!(!result.launch_failed);
}

#[tokio::test]
async fn run_uses_working_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("marker.txt"), "here").expect("write marker");
    let result = run(&RunRequest::new("cat marker.txt").working_dir(dir.path())).await;
    assert!(result.succeeded);
    assert_eq!(result.stdout, "here");
}

#[tokio::test]
async fn run_launch_failure_is_a_value() {
    let result = run(&RunRequest::new("true").working_dir("/definitely/not/a/dir")).await;
    assert!(!result.succeeded);
    assert!(result.launch_failed);
    assert_eq!(result.exit_code, -1);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn run_times_out_and_kills_pipeline() {
    let started = Instant::now();
    let result = run(&RunRequest::new("sleep 30 | cat").timeout(Duration::from_millis(300))).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.succeeded);
    assert!(result.timed_out);
    assert_eq!(result.exit_code, -1);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn stream_classifies_lines_in_order() {
    let script = "printf '✓ created file\\nHello world\\n\\nTotal duration (wall): 3.2s\\n✓ ran tests\\n'";
    let (result, events) = stream_collect(RunRequest::new(script)).await;

    assert!(result.succeeded);
    assert_eq!(
        events,
        vec![
            StreamEvent::Milestone("✓ created file".to_string()),
            StreamEvent::Content("Hello world".to_string()),
            StreamEvent::Milestone("✓ ran tests".to_string()),
        ]
    );
    assert_eq!(
        result.stdout,
        "✓ created file\nHello world\n\nTotal duration (wall): 3.2s\n✓ ran tests"
    );
    assert_eq!(result.milestones, vec!["✓ created file", "✓ ran tests"]);
}

#[tokio::test]
async fn stream_merges_stderr() {
    let (result, events) = stream_collect(RunRequest::new("echo problem 1>&2; exit 2")).await;
    assert!(!result.succeeded);
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.stdout, "problem");
    assert_eq!(events, vec![StreamEvent::Content("problem".to_string())]);
}

#[tokio::test]
async fn stream_keeps_write_order_across_stdout_and_stderr() {
    let script = "seq 1 3000 | sed 's/^/o/'; echo MID 1>&2; echo tail";
    let (result, events) = stream_collect(RunRequest::new(script)).await;

    assert!(result.succeeded);
    let lines: Vec<&str> = result.stdout.lines().collect();
    assert_eq!(lines.len(), 3002);
    assert_eq!(lines[2999], "o3000");
    assert_eq!(lines[3000], "MID");
    assert_eq!(lines[3001], "tail");
    assert_eq!(events[3000], StreamEvent::Content("MID".to_string()));
}

#[tokio::test]
async fn stream_silent_process_times_out_with_empty_transcript() {
    let request = RunRequest::new("sleep 30").timeout(Duration::from_millis(300));
    let (result, events) = stream_collect(request).await;
    assert!(!result.succeeded);
    assert!(result.timed_out);
    assert_eq!(result.stdout, "");
    assert!(events.is_empty());
}

#[tokio::test]
async fn stream_timeout_keeps_partial_transcript() {
    let request =
        RunRequest::new("echo '✓ step one'; echo working; sleep 30").timeout(Duration::from_millis(800));
    let (result, events) = stream_collect(request).await;
    assert!(result.timed_out);
    assert_eq!(result.stdout, "✓ step one\nworking");
    assert_eq!(result.milestones, vec!["✓ step one"]);
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn affirmations_answer_a_bounded_number_of_prompts() {
    let script = "for i in 1 2 3 4 5 6 7; do if read answer; then echo \"got $answer\"; else echo eof; fi; done";
    let request = RunRequest::new(script).affirmations(Some(6));
    let (result, _) = stream_collect(request).await;
    assert!(result.succeeded);
    let lines: Vec<&str> = result.stdout.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[..6].iter().all(|line| *line == "got y"));
    assert_eq!(lines[6], "eof");
}

#[tokio::test]
async fn without_affirmations_stdin_is_closed() {
    let result = run(&RunRequest::new("if read a; then echo got; else echo none; fi")).await;
    assert_eq!(result.stdout.trim(), "none");
}

#[tokio::test]
async fn dropped_consumer_does_not_abort_stream() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let result = stream_run(&RunRequest::new("echo a; echo b; echo c"), tx).await;
    assert!(result.succeeded);
    assert_eq!(result.stdout, "a\nb\nc");
}
