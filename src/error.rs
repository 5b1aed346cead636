//! Error kinds surfaced to callers of this crate.
//!
//! Runtime errors inside background tasks (reader EOF on `Stop`, a probe
//! command that fails to spawn, a slow subscriber dropping a message) are
//! logged via `tracing` and never propagate here — see spec.md §7.

use thiserror::Error;

/// Errors returned by [`crate::process::Process`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn child process: {0}")]
    Spawn(String),
    #[error("failed while waiting on child process: {0}")]
    Wait(String),
}

/// Errors returned by [`crate::managed_process::ManagedProcess`].
#[derive(Debug, Error)]
pub enum ManagedProcessError {
    #[error("managed process is already running")]
    AlreadyRunning,
    #[error("managed process is not running")]
    NotRunning,
}

/// Errors returned by [`crate::probe::Probe`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    ManagedProcess(#[from] ManagedProcessError),
}

/// Errors returned by [`crate::service::Service`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service {0:?} is already started")]
    AlreadyStarted(String),
    #[error("service {0:?} is not started")]
    NotStarted(String),
    #[error("service {0:?} has no log stream to subscribe to (not started?)")]
    NotSubscribable(String),
    #[error(transparent)]
    ManagedProcess(#[from] ManagedProcessError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Errors returned by [`crate::system::System`].
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("system is already started")]
    AlreadyStarted,
    #[error("system is not started")]
    NotStarted,
    #[error("no log stream to subscribe to (not started?)")]
    NotSubscribable,
    #[error("duplicate service name {0:?}")]
    DuplicateServiceName(String),
    #[error("service {referrer:?} depends on unknown service {name:?}")]
    UnknownDependency { referrer: String, name: String },
    #[error(
        "could not resolve dependency graph; {} of {} services unresolved after {} iterations: {unresolved:?}",
        unresolved.len(), total, total
    )]
    UnresolvableGraph { unresolved: Vec<String>, total: usize },
    #[error("service {name:?} failed to start: {source}")]
    ServiceStartFailed { name: String, #[source] source: ServiceError },
}
