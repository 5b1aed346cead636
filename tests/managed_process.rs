//! End-to-end restart-policy scenarios (spec.md §8, scenarios 1-3).

use std::time::Duration;

use dspo_supervisor::managed_process::ManagedProcess;
use dspo_supervisor::spec::{LogRecord, RestartPolicy};
use tokio::sync::mpsc;

const COMMAND: &str = "echo first; sleep 0.1; echo second";

async fn collect_stdout(rx: &mut mpsc::Receiver<LogRecord>, deadline: Duration) -> Vec<u8> {
    let mut payload = Vec::new();
    let _ = tokio::time::timeout(deadline, async {
        while let Some(record) = rx.recv().await {
            if record.is_stdout {
                payload.extend_from_slice(&record.payload);
            }
        }
    })
    .await;
    payload
}

#[tokio::test]
async fn never_policy_runs_exactly_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let exits = Arc::new(AtomicUsize::new(0));
    let exits_clone = exits.clone();

    let (tx, mut rx) = mpsc::channel(64);
    let mp = ManagedProcess::new(
        "never-svc",
        "/bin/bash",
        COMMAND,
        vec![],
        true,
        RestartPolicy::Never,
        Duration::from_millis(100),
        tx,
        move |_code| {
            exits_clone.fetch_add(1, Ordering::SeqCst);
        },
    );

    mp.start().await.unwrap();
    let payload = collect_stdout(&mut rx, Duration::from_millis(500)).await;
    assert_eq!(payload, b"first\nsecond\n");
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert!(!mp.running());
}

#[tokio::test]
async fn unless_stopped_policy_respawns_until_stopped() {
    let (tx, mut rx) = mpsc::channel(256);
    let mp = ManagedProcess::new(
        "unless-stopped-svc",
        "/bin/bash",
        COMMAND,
        vec![],
        true,
        RestartPolicy::UnlessStopped,
        Duration::from_millis(200),
        tx,
        |_code| {},
    );

    mp.start().await.unwrap();
    let payload = collect_stdout(&mut rx, Duration::from_millis(1500)).await;
    let occurrences = payload.windows(13).filter(|w| *w == b"first\nsecond\n").count();
    assert!(occurrences >= 2, "expected at least two runs, saw payload {:?}", String::from_utf8_lossy(&payload));

    mp.stop().await.unwrap();
    assert!(!mp.running());
}

#[tokio::test]
async fn on_failure_policy_stops_after_zero_exit() {
    let (tx, mut rx) = mpsc::channel(256);
    let mp = ManagedProcess::new(
        "on-failure-svc",
        "/bin/bash",
        "echo first; sleep 0.1; echo second; exit 1",
        vec![],
        true,
        RestartPolicy::OnFailure,
        Duration::from_millis(200),
        tx,
        |_code| {},
    );

    mp.start().await.unwrap();
    let payload = collect_stdout(&mut rx, Duration::from_millis(1500)).await;
    let occurrences = payload.windows(13).filter(|w| *w == b"first\nsecond\n").count();
    assert!(occurrences >= 2, "expected at least two runs, saw payload {:?}", String::from_utf8_lossy(&payload));

    mp.stop().await.unwrap();
}

#[tokio::test]
async fn stop_before_start_is_rejected_and_idempotent() {
    let (tx, _rx) = mpsc::channel(8);
    let mp = ManagedProcess::new(
        "idempotent-svc",
        "/bin/bash",
        "true",
        vec![],
        true,
        RestartPolicy::Never,
        Duration::from_millis(10),
        tx,
        |_code| {},
    );

    assert!(mp.stop().await.is_err());
    mp.start().await.unwrap();
    assert!(mp.start().await.is_err());
}
