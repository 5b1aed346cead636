//! Periodic startup/liveness check (spec.md §4.5).
//!
//! A `Probe` is a [`ManagedProcess`] running with [`RestartPolicy::UnlessStopped`]
//! whose exit code is interpreted as ready/not-ready rather than success/failure.
//! The probe command is always run under `/bin/bash`, independent of the owning
//! service's configured shell.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::ProbeError;
use crate::managed_process::ManagedProcess;
use crate::spec::{LogRecord, RestartPolicy};

const PROBE_SHELL: &str = "/bin/bash";

struct ProbeState {
    ignore_until: Instant,
    failure_count: u32,
    ready: bool,
}

/// Lets a [`Service`](crate::service::Service) collapse a liveness probe's
/// grace period to "now" the instant the startup probe first succeeds,
/// without needing shared ownership of the `Probe` itself (spec.md §4.6).
#[derive(Clone)]
pub struct ArmHandle {
    state: Arc<Mutex<ProbeState>>,
}

impl ArmHandle {
    /// Collapses the ignore-until window to effectively now, so the next
    /// probe exit is no longer swallowed by the startup grace period.
    pub fn arm(&self) {
        self.state.lock().unwrap().ignore_until = Instant::now();
    }
}

pub struct Probe {
    managed_process: ManagedProcess,
    startup_tolerance: Duration,
    state: Arc<Mutex<ProbeState>>,
}

impl Probe {
    /// `on_ready` fires the first time a probe run exits zero after being
    /// not-ready (or on the very first run). `on_not_ready` fires once
    /// `permitted_failures` consecutive non-zero runs have accumulated.
    /// Exits observed before `startup_tolerance` has elapsed since the last
    /// [`Probe::start`] (or [`Probe::set_ignore_until`]) are ignored
    /// entirely.
    pub fn new(
        startup_tolerance: Duration,
        probe_interval: Duration,
        permitted_failures: u32,
        command: impl Into<String>,
        env: Vec<(String, String)>,
        inherit_env: bool,
        on_ready: impl Fn() + Send + Sync + 'static,
        on_not_ready: impl Fn() + Send + Sync + 'static,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let state = Arc::new(Mutex::new(ProbeState {
            ignore_until: Instant::now(),
            failure_count: 0,
            ready: false,
        }));

        let (output_tx, output_rx) = mpsc::channel::<LogRecord>(1);
        spawn_trace_sink(output_rx);

        let exit_state = state.clone();
        let managed_process = ManagedProcess::new(
            name,
            PROBE_SHELL,
            command,
            env,
            inherit_env,
            RestartPolicy::UnlessStopped,
            probe_interval,
            output_tx,
            move |code| on_exit(&exit_state, permitted_failures, &on_ready, &on_not_ready, code),
        );

        Probe { managed_process, startup_tolerance, state }
    }

    pub fn ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    /// Overrides the grace window during which exits are ignored.
    pub fn set_ignore_until(&self, ignore_until: Instant) {
        self.state.lock().unwrap().ignore_until = ignore_until;
    }

    /// A cheap, cloneable handle that can arm this probe's ignore window from
    /// elsewhere (e.g. a sibling startup probe's ready callback) without
    /// sharing ownership of the `Probe` itself.
    pub fn arm_handle(&self) -> ArmHandle {
        ArmHandle { state: self.state.clone() }
    }

    pub async fn start(&self) -> Result<(), ProbeError> {
        self.managed_process.start().await?;
        let mut guard = self.state.lock().unwrap();
        guard.ignore_until = Instant::now() + self.startup_tolerance;
        guard.failure_count = 0;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ProbeError> {
        self.managed_process.stop().await?;
        Ok(())
    }
}

fn on_exit(
    state: &Arc<Mutex<ProbeState>>,
    permitted_failures: u32,
    on_ready: &(dyn Fn() + Send + Sync),
    on_not_ready: &(dyn Fn() + Send + Sync),
    code: i32,
) {
    let mut guard = state.lock().unwrap();
    if Instant::now() < guard.ignore_until {
        return;
    }

    if code != 0 {
        guard.failure_count += 1;
        if guard.failure_count > permitted_failures {
            guard.ready = false;
            on_not_ready();
        }
        return;
    }

    guard.ready = true;
    guard.failure_count = 0;
    on_ready();
}

fn spawn_trace_sink(mut rx: mpsc::Receiver<LogRecord>) {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            trace!(
                service = %record.service,
                stdout = record.is_stdout,
                bytes = record.payload.len(),
                "probe output"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn ready_after_successful_run() {
        let ready = Arc::new(AtomicBool::new(false));
        let ready_clone = ready.clone();
        let not_ready = Arc::new(AtomicBool::new(false));
        let not_ready_clone = not_ready.clone();

        let probe = Probe::new(
            Duration::from_millis(0),
            Duration::from_millis(20),
            0,
            "true",
            vec![],
            true,
            move || ready_clone.store(true, Ordering::SeqCst),
            move || not_ready_clone.store(true, Ordering::SeqCst),
            "test-probe",
        );

        probe.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        probe.stop().await.unwrap();

        assert!(ready.load(Ordering::SeqCst));
        assert!(!not_ready.load(Ordering::SeqCst));
        assert!(probe.ready());
    }

    #[tokio::test]
    async fn not_ready_after_permitted_failures_exceeded() {
        let not_ready = Arc::new(AtomicBool::new(false));
        let not_ready_clone = not_ready.clone();

        let probe = Probe::new(
            Duration::from_millis(0),
            Duration::from_millis(10),
            1,
            "false",
            vec![],
            true,
            || {},
            move || not_ready_clone.store(true, Ordering::SeqCst),
            "test-probe-fail",
        );

        probe.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        probe.stop().await.unwrap();

        assert!(not_ready.load(Ordering::SeqCst));
        assert!(!probe.ready());
    }
}
