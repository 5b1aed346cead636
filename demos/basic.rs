//! Minimal end-to-end demo: two services, one depending on the other, both
//! gated by a trivial startup probe. Not a shipped CLI (see spec.md §1
//! Non-goals) — just a way to exercise [`System`] without the out-of-scope
//! declarative loader.

use std::time::Duration;

use dspo_supervisor::spec::{
    LivenessProbeSpec, ManagedProcessSpec, RestartPolicy, ServiceSpec, StartupProbeSpec,
};
use dspo_supervisor::System;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let database = ServiceSpec {
        name: "database".into(),
        depends_on: vec![],
        managed_process: ManagedProcessSpec {
            shell: "/bin/bash".into(),
            command: "while true; do echo 'database tick'; sleep 1; done".into(),
            env: vec![],
            inherit_env: true,
            restart_policy: RestartPolicy::UnlessStopped,
            restart_wait: Duration::from_millis(500),
        },
        startup_probe: Some(StartupProbeSpec {
            startup_tolerance: Duration::from_millis(200),
            probe_interval: Duration::from_millis(100),
            command: "true".into(),
        }),
        liveness_probe: Some(LivenessProbeSpec {
            probe_interval: Duration::from_secs(1),
            permitted_failures: 3,
            command: "true".into(),
        }),
    };

    let api = ServiceSpec {
        name: "api".into(),
        depends_on: vec!["database".into()],
        managed_process: ManagedProcessSpec {
            shell: "/bin/bash".into(),
            command: "while true; do echo 'api tick'; sleep 1; done".into(),
            env: vec![],
            inherit_env: true,
            restart_policy: RestartPolicy::UnlessStopped,
            restart_wait: Duration::from_millis(500),
        },
        startup_probe: Some(StartupProbeSpec {
            startup_tolerance: Duration::from_millis(200),
            probe_interval: Duration::from_millis(100),
            command: "true".into(),
        }),
        liveness_probe: None,
    };

    let system = System::new(vec![database, api]);
    system.start().await.expect("system failed to start");

    let (mut logs, _unsubscribe) = system.subscribe_to_logs().expect("system is started");
    let printer = tokio::spawn(async move {
        while let Some(record) = logs.recv().await {
            let stream = if record.is_stdout { "stdout" } else { "stderr" };
            println!(
                "[{}:{}] {}",
                record.service,
                stream,
                String::from_utf8_lossy(&record.payload).trim_end()
            );
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;

    system.stop().await.expect("system failed to stop");
    printer.abort();
}
