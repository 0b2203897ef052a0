use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mendeley_uploader_core::contract::ApiError;
use mendeley_uploader_core::ledger::Outcome;
use mendeley_uploader_core::monitor::{RunMonitor, IDLE_MESSAGE};
use mendeley_uploader_core::retry::{with_retry, RetryPolicy};

#[test]
fn test_backoff_doubles_and_is_capped() {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_secs(5),
        max_backoff: Duration::from_secs(60),
    };
    assert_eq!(policy.backoff_for(1), Duration::from_secs(5));
    assert_eq!(policy.backoff_for(2), Duration::from_secs(10));
    assert_eq!(policy.backoff_for(3), Duration::from_secs(20));
    assert_eq!(policy.backoff_for(5), Duration::from_secs(60));
    assert_eq!(policy.backoff_for(40), Duration::from_secs(60));
}

#[test]
fn test_status_classification() {
    assert!(matches!(
        ApiError::from_status(401, String::new(), None),
        ApiError::Unauthorized { .. }
    ));
    assert!(ApiError::from_status(429, String::new(), None).is_transient());
    assert!(ApiError::from_status(502, String::new(), None).is_transient());
    assert!(!ApiError::from_status(404, String::new(), None).is_transient());
    assert!(!ApiError::from_status(401, String::new(), None).is_transient());
    assert_eq!(
        ApiError::from_status(429, String::new(), Some(Duration::from_secs(7))).retry_after(),
        Some(Duration::from_secs(7))
    );
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), ApiError> = with_retry(&RetryPolicy::immediate(5), "op", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            Err(ApiError::Rejected {
                status: 400,
                body: "no".into(),
            })
        }
    })
    .await;

    assert!(matches!(result, Err(ApiError::Rejected { status: 400, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured() {
    let policy = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(60),
    };
    let calls = AtomicU32::new(0);
    let started = tokio::time::Instant::now();

    let result = with_retry(&policy, "op", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(ApiError::RateLimited {
                    retry_after: Some(Duration::from_secs(12)),
                })
            } else {
                Ok(n)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 1);
    assert!(started.elapsed() >= Duration::from_secs(12));
}

#[tokio::test]
async fn test_zero_attempts_still_calls_once() {
    let calls = AtomicU32::new(0);
    let result: Result<(), ApiError> = with_retry(&RetryPolicy::immediate(0), "op", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(ApiError::Transport("down".into())) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_monitor_allows_one_run_at_a_time() {
    let monitor = RunMonitor::new();
    assert_eq!(monitor.snapshot().status_message, IDLE_MESSAGE);
    assert!(!monitor.request_stop());

    let run = monitor.try_start().expect("first start");
    assert!(monitor.is_running());
    assert!(monitor.try_start().is_none());
    assert_eq!(monitor.snapshot().run_id, Some(run.run_id()));

    run.set_totals(3, 1);
    run.begin_file("a.pdf");
    run.record(Outcome::Success);
    run.record(Outcome::FailedUpload);
    let status = monitor.snapshot();
    assert_eq!(status.current_file, "a.pdf");
    assert_eq!(status.processed_files, 2);
    assert_eq!(status.succeeded, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.skipped, 1);

    assert!(monitor.request_stop());
    assert!(run.stop_requested());
    run.finish("Done");

    let status = monitor.snapshot();
    assert!(!status.is_running);
    assert!(status.current_file.is_empty());
    assert_eq!(status.status_message, "Done");

    let next = monitor.try_start().expect("monitor free again");
    assert!(!next.stop_requested(), "stop flag resets for a new run");
    assert_eq!(monitor.snapshot().processed_files, 0);
}

#[test]
fn test_dropped_guard_releases_the_monitor() {
    let monitor = RunMonitor::new();
    {
        let _run = monitor.try_start().unwrap();
    }
    let status = monitor.snapshot();
    assert!(!status.is_running);
    assert_eq!(status.status_message, "Interrupted");
    assert!(monitor.try_start().is_some());
}
