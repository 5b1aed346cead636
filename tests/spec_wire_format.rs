//! Wire-shape checks for the declarative boundary types (spec.md §3,
//! SPEC_FULL.md §3.1): the (out-of-scope) loader on the other side of this
//! boundary needs a stable JSON shape, including the original's lowercase
//! `RestartPolicy` vocabulary.

use std::time::Duration;

use dspo_supervisor::spec::{ManagedProcessSpec, RestartPolicy, ServiceSpec};

#[test]
fn restart_policy_serializes_to_original_vocabulary() {
    assert_eq!(serde_json::to_string(&RestartPolicy::Never).unwrap(), "\"no\"");
    assert_eq!(
        serde_json::to_string(&RestartPolicy::UnlessStopped).unwrap(),
        "\"unless-stopped\""
    );
    assert_eq!(
        serde_json::to_string(&RestartPolicy::OnFailure).unwrap(),
        "\"on-failure\""
    );
}

#[test]
fn service_spec_round_trips_through_json() {
    let spec = ServiceSpec {
        name: "api".into(),
        depends_on: vec!["database".into()],
        managed_process: ManagedProcessSpec {
            shell: "/bin/bash".into(),
            command: "serve".into(),
            env: vec![("PORT".into(), "8080".into())],
            inherit_env: true,
            restart_policy: RestartPolicy::OnFailure,
            restart_wait: Duration::from_secs(2),
        },
        startup_probe: None,
        liveness_probe: None,
    };

    let json = serde_json::to_string(&spec).unwrap();
    let round_tripped: ServiceSpec = serde_json::from_str(&json).unwrap();

    assert_eq!(round_tripped.name, spec.name);
    assert_eq!(round_tripped.depends_on, spec.depends_on);
    assert_eq!(round_tripped.managed_process.restart_policy, RestartPolicy::OnFailure);
}

#[test]
fn depends_on_and_probes_default_when_absent_from_the_wire() {
    let minimal = r#"{
        "name": "solo",
        "managed_process": {
            "shell": "/bin/sh",
            "command": "true",
            "env": [],
            "inherit_env": true,
            "restart_policy": "no",
            "restart_wait": {"secs": 0, "nanos": 0}
        }
    }"#;

    let spec: ServiceSpec = serde_json::from_str(minimal).unwrap();
    assert!(spec.depends_on.is_empty());
    assert!(spec.startup_probe.is_none());
    assert!(spec.liveness_probe.is_none());
}
