//! Probe ready/not-ready edge transitions driven by a flag-file harness
//! (spec.md §8, scenario 4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dspo_supervisor::probe::Probe;
use dspo_supervisor::test_support::ProbeHarness;

async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn probe_flips_ready_then_not_ready_with_harness() {
    let harness = ProbeHarness::new("edge");

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let probe = Probe::new(
        Duration::from_millis(300),
        Duration::from_millis(100),
        3,
        harness.executable_path(),
        vec![],
        true,
        move || ready_clone.store(true, Ordering::SeqCst),
        move || {},
        "edge-probe",
    );

    probe.start().await.unwrap();

    // Still within the startup-tolerance grace window: exits are ignored.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!ready.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(400)).await;
    harness.set_ready();
    assert!(wait_until(Duration::from_secs(5), || ready.load(Ordering::SeqCst)).await);
    assert!(probe.ready());

    harness.set_not_ready();
    assert!(wait_until(Duration::from_secs(5), || !probe.ready()).await);

    probe.stop().await.unwrap();
}
