//! A local process supervisor with dependency-ordered startup, restart
//! policies, and Kubernetes-style startup/liveness probes.
//!
//! [`System`] is the top-level entry point: hand it a list of
//! [`ServiceSpec`]s, call [`System::start`], and it brings each service up in
//! dependency order, restarting per its [`RestartPolicy`] and gating
//! dependents on their parents' startup probes. Every service's stdout and
//! stderr is tagged into [`LogRecord`]s and multiplexed onto one subscribable
//! stream via [`System::subscribe_to_logs`].
//!
//! This crate deliberately does not own a command-line entry point, a
//! declarative service-file format, persistent logging, or cross-host
//! orchestration — see spec.md §1 for the full boundary.

pub mod error;
pub mod fanin;
pub mod fanout;
pub mod managed_process;
pub mod probe;
pub mod process;
pub mod service;
pub mod spec;
pub mod system;

pub use error::{ManagedProcessError, ProbeError, ProcessError, ServiceError, SystemError};
pub use fanin::Fanin;
pub use fanout::Fanout;
pub use managed_process::ManagedProcess;
pub use probe::Probe;
pub use process::Process;
pub use service::{Service, ServiceCallbacks};
pub use spec::{
    LogRecord, ManagedProcessSpec, LivenessProbeSpec, RestartPolicy, ServiceSpec, StartupProbeSpec,
};
pub use system::System;

/// Test-only fixtures (probe harnesses, mock service specs) shared between
/// this crate's unit tests and its `tests/` integration suite. Not part of
/// the crate's semver-stable API.
pub mod test_support;
