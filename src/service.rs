//! A managed process plus up to two probes and a log fanout (spec.md §4.6).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::ServiceError;
use crate::fanout::{Fanout, Unsubscribe};
use crate::managed_process::ManagedProcess;
use crate::probe::Probe;
use crate::spec::{LogRecord, ServiceSpec};

/// Effectively-infinite ignore-until tolerance for a liveness probe at
/// construction time: it only starts counting failures once the startup
/// probe (if any) reports ready, via [`Probe::set_ignore_until`]. Matches the
/// original implementation's century-scale sentinel.
const LIVENESS_STARTUP_TOLERANCE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

struct ServiceState {
    started: bool,
    startup_ready: bool,
    liveness_ready: bool,
}

/// One Start/Stop cycle's log fanout, plus the handle to cancel the relay
/// task feeding it (see [`spawn_log_relay`]).
struct FanoutCycle {
    fanout: Fanout<LogRecord>,
    relay_cancel: Arc<Notify>,
}

/// Callbacks a [`crate::system::System`] wires in to cascade dependent
/// services' startup once this one becomes ready, and to react to liveness
/// transitions.
#[derive(Clone)]
pub struct ServiceCallbacks {
    pub on_startup_ready: Arc<dyn Fn() + Send + Sync>,
    pub on_liveness_ready: Arc<dyn Fn() + Send + Sync>,
    pub on_liveness_not_ready: Arc<dyn Fn() + Send + Sync>,
}

impl Default for ServiceCallbacks {
    fn default() -> Self {
        ServiceCallbacks {
            on_startup_ready: Arc::new(|| {}),
            on_liveness_ready: Arc::new(|| {}),
            on_liveness_not_ready: Arc::new(|| {}),
        }
    }
}

pub struct Service {
    name: String,
    managed_process: ManagedProcess,
    startup_probe: Option<Probe>,
    liveness_probe: Option<Probe>,
    has_startup_probe: bool,
    has_liveness_probe: bool,
    // Receiving end of `managed_process`'s fixed output channel, held for the
    // Service's whole lifetime. A fresh relay + `Fanout` pair is built over
    // it in `start()` and torn down in `stop()`, matching the original's
    // `s.fanout = fanout.New(s.logs)` / `s.fanout.Close(); s.fanout = nil`.
    logs_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<LogRecord>>>,
    fanout: Mutex<Option<FanoutCycle>>,
    state: Arc<Mutex<ServiceState>>,
    callbacks: ServiceCallbacks,
}

impl Service {
    pub fn new(spec: ServiceSpec, callbacks: ServiceCallbacks) -> Self {
        let name = spec.name.clone();
        let (logs_tx, logs_rx) = mpsc::channel::<LogRecord>(1024);
        let has_startup_probe = spec.startup_probe.is_some();
        let has_liveness_probe = spec.liveness_probe.is_some();

        let managed_process = ManagedProcess::new(
            name.clone(),
            spec.managed_process.shell,
            spec.managed_process.command,
            spec.managed_process.env.clone(),
            spec.managed_process.inherit_env,
            spec.managed_process.restart_policy,
            spec.managed_process.restart_wait,
            logs_tx,
            |_code| {},
        );

        let state = Arc::new(Mutex::new(ServiceState {
            started: false,
            startup_ready: !has_startup_probe,
            liveness_ready: !has_liveness_probe,
        }));

        let liveness_probe = spec.liveness_probe.map(|liveness_spec| {
            let on_ready = callbacks.on_liveness_ready.clone();
            let on_not_ready = callbacks.on_liveness_not_ready.clone();
            let state = state.clone();
            Probe::new(
                LIVENESS_STARTUP_TOLERANCE,
                liveness_spec.probe_interval,
                liveness_spec.permitted_failures,
                liveness_spec.command,
                spec.managed_process.env.clone(),
                spec.managed_process.inherit_env,
                move || liveness_on_ready(&state, &on_ready),
                move || liveness_on_not_ready(&state, &on_not_ready),
                format!("{name}_liveness"),
            )
        });

        let startup_probe = spec.startup_probe.map(|startup_spec| {
            let on_startup_ready = callbacks.on_startup_ready.clone();
            let state = state.clone();
            let liveness_arm = liveness_probe.as_ref().map(Probe::arm_handle);
            Probe::new(
                startup_spec.startup_tolerance,
                startup_spec.probe_interval,
                0,
                startup_spec.command,
                spec.managed_process.env.clone(),
                spec.managed_process.inherit_env,
                move || startup_on_ready(&state, &on_startup_ready, liveness_arm.as_ref()),
                || {},
                format!("{name}_startup"),
            )
        });

        Service {
            name: spec.name,
            managed_process,
            startup_probe,
            liveness_probe,
            has_startup_probe,
            has_liveness_probe,
            logs_rx: Arc::new(tokio::sync::Mutex::new(logs_rx)),
            fanout: Mutex::new(None),
            state,
            callbacks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn startup_ready(&self) -> bool {
        self.state.lock().unwrap().startup_ready
    }

    pub fn liveness_ready(&self) -> bool {
        self.state.lock().unwrap().liveness_ready
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        {
            let mut guard = self.state.lock().unwrap();
            if guard.started {
                return Err(ServiceError::AlreadyStarted(self.name.clone()));
            }
            guard.started = true;
            guard.startup_ready = !self.has_startup_probe;
            guard.liveness_ready = !self.has_liveness_probe;
        }

        self.managed_process.start().await?;

        if let Some(probe) = &self.startup_probe {
            probe.start().await?;
        }
        if let Some(probe) = &self.liveness_probe {
            probe.start().await?;
        }

        let (cycle_tx, cycle_rx) = mpsc::channel::<LogRecord>(1024);
        let relay_cancel = Arc::new(Notify::new());
        spawn_log_relay(self.logs_rx.clone(), cycle_tx, relay_cancel.clone());
        *self.fanout.lock().unwrap() = Some(FanoutCycle { fanout: Fanout::new(cycle_rx), relay_cancel });

        debug!(service = %self.name, "started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ServiceError> {
        {
            let guard = self.state.lock().unwrap();
            if !guard.started {
                return Err(ServiceError::NotStarted(self.name.clone()));
            }
        }

        if let Some(probe) = &self.liveness_probe {
            let was_ready = self.state.lock().unwrap().liveness_ready;
            let _ = probe.stop().await;
            if was_ready {
                liveness_on_not_ready(&self.state, &self.callbacks.on_liveness_not_ready);
            }
        }
        if let Some(probe) = &self.startup_probe {
            let _ = probe.stop().await;
        }
        let _ = self.managed_process.stop().await;

        if let Some(cycle) = self.fanout.lock().unwrap().take() {
            cycle.relay_cancel.notify_one();
            cycle.fanout.close();
        }

        let mut guard = self.state.lock().unwrap();
        guard.started = false;
        guard.startup_ready = false;
        guard.liveness_ready = false;

        debug!(service = %self.name, "stopped");
        Ok(())
    }

    /// Registers a fresh subscriber on this service's log fanout. Fails if
    /// the service isn't started.
    pub fn subscribe_to_logs(
        &self,
    ) -> Result<(mpsc::Receiver<LogRecord>, Unsubscribe), ServiceError> {
        match self.fanout.lock().unwrap().as_ref() {
            Some(cycle) => Ok(cycle.fanout.subscribe()),
            None => Err(ServiceError::NotSubscribable(self.name.clone())),
        }
    }
}

/// Relays records from the Service's permanent log channel into one cycle's
/// `Fanout` input, until cancelled at `stop()`. Holding `logs_rx` locked for
/// the relay's lifetime lets the next cycle's relay pick it back up once this
/// one releases it.
fn spawn_log_relay(
    logs_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<LogRecord>>>,
    cycle_tx: mpsc::Sender<LogRecord>,
    cancel: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut guard = logs_rx.lock().await;
        loop {
            tokio::select! {
                _ = cancel.notified() => break,
                maybe_record = guard.recv() => match maybe_record {
                    Some(record) => {
                        if cycle_tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
}

fn startup_on_ready(
    state: &Arc<Mutex<ServiceState>>,
    on_startup_ready: &Arc<dyn Fn() + Send + Sync>,
    liveness_arm: Option<&crate::probe::ArmHandle>,
) {
    let mut guard = state.lock().unwrap();
    if guard.startup_ready {
        return;
    }
    guard.startup_ready = true;
    drop(guard);
    on_startup_ready();
    if let Some(arm) = liveness_arm {
        arm.arm();
    }
}

fn liveness_on_ready(state: &Arc<Mutex<ServiceState>>, on_liveness_ready: &Arc<dyn Fn() + Send + Sync>) {
    let mut guard = state.lock().unwrap();
    if guard.liveness_ready {
        return;
    }
    guard.liveness_ready = true;
    drop(guard);
    on_liveness_ready();
}

fn liveness_on_not_ready(
    state: &Arc<Mutex<ServiceState>>,
    on_liveness_not_ready: &Arc<dyn Fn() + Send + Sync>,
) {
    let mut guard = state.lock().unwrap();
    if !guard.liveness_ready {
        return;
    }
    guard.liveness_ready = false;
    drop(guard);
    on_liveness_not_ready();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ManagedProcessSpec, RestartPolicy, StartupProbeSpec};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    fn spec(name: &str, command: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.into(),
            depends_on: vec![],
            managed_process: ManagedProcessSpec {
                shell: "/bin/sh".into(),
                command: command.into(),
                env: vec![],
                inherit_env: true,
                restart_policy: RestartPolicy::Never,
                restart_wait: StdDuration::from_millis(10),
            },
            startup_probe: None,
            liveness_probe: None,
        }
    }

    #[tokio::test]
    async fn start_stop_round_trip_produces_logs() {
        let service = Service::new(
            spec("echo-svc", "echo hello"),
            ServiceCallbacks::default(),
        );

        service.start().await.unwrap();
        let (mut logs, _unsub) = service.subscribe_to_logs().unwrap();
        let record = tokio::time::timeout(StdDuration::from_secs(2), logs.recv())
            .await
            .expect("did not time out")
            .expect("got a log record");
        assert_eq!(record.payload, b"hello\n");

        service.stop().await.unwrap();
        assert!(!service.started());
    }

    #[tokio::test]
    async fn startup_probe_gates_ready_callback() {
        let mut spec = spec("probed-svc", "sleep 1");
        spec.startup_probe = Some(StartupProbeSpec {
            startup_tolerance: StdDuration::from_millis(0),
            probe_interval: StdDuration::from_millis(20),
            command: "true".into(),
        });

        let became_ready = Arc::new(AtomicBool::new(false));
        let became_ready_clone = became_ready.clone();
        let callbacks = ServiceCallbacks {
            on_startup_ready: Arc::new(move || became_ready_clone.store(true, Ordering::SeqCst)),
            ..ServiceCallbacks::default()
        };

        let service = Service::new(spec, callbacks);
        assert!(!service.startup_ready());

        service.start().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert!(service.startup_ready());
        assert!(became_ready.load(Ordering::SeqCst));

        service.stop().await.unwrap();
    }
}
