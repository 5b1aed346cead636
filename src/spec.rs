//! Declarative data model (spec.md §3).
//!
//! These types are the boundary the (out-of-scope) declarative service-file
//! loader hands to [`crate::system::System`]. They derive `Serialize`/
//! `Deserialize` so that boundary has a stable wire shape, not because this
//! crate owns a config-file format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One chunk of captured child output. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub service: String,
    pub is_stdout: bool,
    pub is_stderr: bool,
    /// UTC milliseconds since epoch.
    pub timestamp_ms: i64,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub(crate) fn new(service: impl Into<String>, is_stdout: bool, payload: Vec<u8>) -> Self {
        LogRecord {
            service: service.into(),
            is_stdout,
            is_stderr: !is_stdout,
            timestamp_ms: now_millis(),
            payload,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Governs whether a [`crate::managed_process::ManagedProcess`] respawns
/// after its child exits. Wire names mirror the original Go implementation's
/// vocabulary (`"no"`, `"unless-stopped"`, `"on-failure"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[serde(rename = "no")]
    Never,
    #[serde(rename = "unless-stopped")]
    UnlessStopped,
    #[serde(rename = "on-failure")]
    OnFailure,
}

/// Everything needed to spawn and, per [`RestartPolicy`], respawn a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcessSpec {
    pub shell: String,
    pub command: String,
    /// Extra environment variables; appended after the inherited process
    /// environment (if any), last key wins on duplicates.
    pub env: Vec<(String, String)>,
    pub inherit_env: bool,
    pub restart_policy: RestartPolicy,
    pub restart_wait: Duration,
}

/// A probe evaluated only during initial bring-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupProbeSpec {
    /// Grace period in which failures are ignored after start.
    pub startup_tolerance: Duration,
    pub probe_interval: Duration,
    pub command: String,
}

/// A probe evaluated continuously once the service is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessProbeSpec {
    pub probe_interval: Duration,
    pub permitted_failures: u32,
    pub command: String,
}

/// One user-declared service: a managed process plus up to two probes and a
/// list of dependency service names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub managed_process: ManagedProcessSpec,
    #[serde(default)]
    pub startup_probe: Option<StartupProbeSpec>,
    #[serde(default)]
    pub liveness_probe: Option<LivenessProbeSpec>,
}
