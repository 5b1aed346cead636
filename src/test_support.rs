//! Test-only fixtures shared by unit tests in this crate and the
//! integration tests under `tests/`. Carried over from
//! `examples/original_source/test/probe_harness.go` — explicitly permitted
//! by spec.md §6 ("probe test harnesses in the test suite may use temp
//! files").

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::spec::{
    LivenessProbeSpec, ManagedProcessSpec, RestartPolicy, ServiceSpec, StartupProbeSpec,
};

/// A flag-file-backed probe command: flips between exiting 0 and exiting 1
/// depending on the last value written to its backing temp file.
pub struct ProbeHarness {
    name: String,
    script_path: PathBuf,
    flag_path: PathBuf,
}

impl ProbeHarness {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let unique = format!("{}_{}", name, uuid::Uuid::new_v4());
        let script_path = std::env::temp_dir().join(format!("{unique}_probe_test.sh"));
        let flag_path = std::env::temp_dir().join(format!("{unique}_probe_harness.tmp"));

        let script = format!(
            "#!/bin/bash\nset -e\nif grep -q 'probe_ready: true' {flag:?}; then\n  exit 0\nfi\nexit 1\n",
            flag = flag_path,
        );
        fs::write(&script_path, script).expect("failed to write probe harness script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
        }

        let harness = ProbeHarness { name, script_path, flag_path };
        harness.set_not_ready();
        harness
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable_path(&self) -> String {
        self.script_path.to_string_lossy().into_owned()
    }

    pub fn set_ready(&self) {
        fs::write(&self.flag_path, "probe_ready: true\n").expect("failed to write probe flag");
    }

    pub fn set_not_ready(&self) {
        fs::write(&self.flag_path, "probe_ready: false\n").expect("failed to write probe flag");
    }
}

impl Drop for ProbeHarness {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.script_path);
        let _ = fs::remove_file(&self.flag_path);
    }
}

/// A `ServiceSpec` wired to fresh startup/liveness [`ProbeHarness`]es,
/// mirroring `examples/original_source/test/test_service.go`'s `MockService`.
pub struct MockService {
    pub startup_harness: ProbeHarness,
    pub liveness_harness: ProbeHarness,
    pub spec: ServiceSpec,
}

pub fn mock_service(name: &str, depends_on: Vec<String>) -> MockService {
    let startup_harness = ProbeHarness::new(format!("{name}_startup"));
    let liveness_harness = ProbeHarness::new(format!("{name}_liveness"));

    let spec = ServiceSpec {
        name: name.to_string(),
        depends_on,
        managed_process: ManagedProcessSpec {
            shell: "/bin/bash".into(),
            command: "while true; do echo tick; sleep 1; done".into(),
            env: vec![],
            inherit_env: true,
            restart_policy: RestartPolicy::UnlessStopped,
            restart_wait: Duration::from_millis(50),
        },
        startup_probe: Some(StartupProbeSpec {
            startup_tolerance: Duration::from_millis(250),
            probe_interval: Duration::from_millis(50),
            command: startup_harness.executable_path(),
        }),
        liveness_probe: Some(LivenessProbeSpec {
            probe_interval: Duration::from_millis(50),
            permitted_failures: 3,
            command: liveness_harness.executable_path(),
        }),
    };

    MockService { startup_harness, liveness_harness, spec }
}
