//! Supervised process execution: cancellation is structural, failure is
//! not, and both are distinguishable.
//!
//! These tests drive real child processes through standard Unix utilities
//! and return early where those are unavailable.

use std::time::{Duration, Instant};

use animorph::{AnimorphError, ToolGateway};

fn has_tool(gateway: &ToolGateway, tool: &str) -> bool {
    let available = gateway.is_available(tool);
    if !available {
        eprintln!("skipping: '{tool}' not available on this system");
    }
    available
}

#[tokio::test]
async fn cancel_terminates_every_inflight_process() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "sleep") {
        return;
    }

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway.run("sleep", &["30"], None).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.cancel_all(), 3, "all three children were live");

    let mut cancelled = 0;
    for handle in handles {
        match handle.await.expect("task joins") {
            Err(err) if err.is_cancelled() => cancelled += 1,
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
    assert_eq!(cancelled, 3);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "children were not terminated promptly"
    );

    // Everything has exited; a repeat signal has nothing left to hit.
    assert_eq!(gateway.cancel_all(), 0);
}

#[test]
fn run_futures_can_cross_task_boundaries() {
    fn require_send<T: Send>(_: T) {}

    let gateway = ToolGateway::new();
    require_send(async move { gateway.run("ffmpeg", &["-version"], None).await });
}

#[tokio::test]
async fn a_run_started_after_cancel_is_cancelled_immediately() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "sleep") {
        return;
    }

    gateway.cancel_all();
    let err = gateway.run("sleep", &["30"], None).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn overrunning_tools_are_killed_at_the_timeout() {
    let gateway = ToolGateway::new().with_timeout(Duration::from_millis(200));
    if !has_tool(&gateway, "sleep") {
        return;
    }

    let started = Instant::now();
    let err = gateway.run("sleep", &["30"], None).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!err.is_cancelled());
    match err {
        AnimorphError::ToolFailure { tool, stderr, .. } => {
            assert_eq!(tool, "sleep");
            assert!(stderr.contains("timed out"));
        }
        other => panic!("expected ToolFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_failure_carries_status_and_stderr() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "sh") {
        return;
    }

    let err = gateway
        .run("sh", &["-c", "echo boom >&2; exit 3"], None)
        .await
        .unwrap_err();
    match err {
        AnimorphError::ToolFailure {
            tool,
            status,
            stderr,
        } => {
            assert_eq!(tool, "sh");
            assert_eq!(status, Some(3));
            assert!(stderr.contains("boom"));
        }
        other => panic!("expected ToolFailure, got {other:?}"),
    }
    // Exit codes never masquerade as cancellation.
    assert!(!gateway.run("sh", &["-c", "exit 3"], None).await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn successful_runs_capture_stdout() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "sh") {
        return;
    }

    let output = gateway
        .run("sh", &["-c", "echo hello"], None)
        .await
        .expect("run succeeds");
    assert_eq!(output.stdout.trim(), "hello");
}

#[tokio::test]
async fn missing_tools_resolve_to_a_named_error() {
    let gateway = ToolGateway::new();
    let err = gateway
        .run("animorph-no-such-tool", &["-h"], None)
        .await
        .unwrap_err();
    match err {
        AnimorphError::ToolNotFound { tool } => assert_eq!(tool, "animorph-no-such-tool"),
        other => panic!("expected ToolNotFound, got {other:?}"),
    }
}
