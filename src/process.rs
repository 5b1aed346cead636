//! Spawn one child through a shell, capture its exit code, and allow
//! force-kill on request (spec.md §4.1).

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::error::ProcessError;

/// Sentinel return code reported by [`Process::return_code`] before the
/// child has terminated.
pub const RETURN_CODE_PENDING: i32 = -1;

#[derive(Debug, Clone)]
enum Outcome {
    Pending,
    Exited(i32),
    SpawnFailed(String),
}

/// A single spawned `<shell> -c <command>` child.
///
/// `run` never fails synchronously on a bad command — any spawn failure
/// surfaces as an error from [`Process::wait`], matching the "failure
/// surfaces via the normal lifecycle pathway" contract in spec.md §4.1.
pub struct Process {
    outcome: watch::Receiver<Outcome>,
    child: Arc<Mutex<Option<Child>>>,
}

/// stdout/stderr handles for a [`Process`], delivered once the child has
/// actually spawned (or dropped, if spawning failed).
pub struct ChildPipes {
    pub stdout: oneshot::Receiver<ChildStdout>,
    pub stderr: oneshot::Receiver<ChildStderr>,
}

impl Process {
    /// Spawns `shell -c command` with a composed environment: the process
    /// environment first (if `inherit_env`), then `env` appended — last
    /// value wins on duplicate keys. Returns immediately; the spawn and the
    /// wait both happen on an independent task.
    pub fn run(
        shell: &str,
        command: &str,
        env: &[(String, String)],
        inherit_env: bool,
        name: impl Into<String>,
    ) -> (Self, ChildPipes) {
        let name = name.into();
        let (outcome_tx, outcome_rx) = watch::channel(Outcome::Pending);
        let (stdout_tx, stdout_rx) = oneshot::channel();
        let (stderr_tx, stderr_rx) = oneshot::channel();
        let child_slot = Arc::new(Mutex::new(None));

        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);
        if !inherit_env {
            cmd.env_clear();
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let wait_slot = child_slot.clone();
        tokio::spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    warn!(service = %name, error = %err, "failed to spawn child process");
                    let _ = outcome_tx.send(Outcome::SpawnFailed(err.to_string()));
                    return;
                }
            };

            if let Some(stdout) = child.stdout.take() {
                let _ = stdout_tx.send(stdout);
            }
            if let Some(stderr) = child.stderr.take() {
                let _ = stderr_tx.send(stderr);
            }

            {
                let mut guard = wait_slot.lock().await;
                *guard = Some(child);
            }

            let status = {
                let mut guard = wait_slot.lock().await;
                let child = guard.as_mut().expect("child was just inserted");
                child.wait().await
            };

            let outcome = match status {
                Ok(status) => {
                    let code = exit_code(&status);
                    debug!(service = %name, code, "child process exited");
                    Outcome::Exited(code)
                }
                Err(err) => {
                    warn!(service = %name, error = %err, "error waiting on child process");
                    Outcome::SpawnFailed(err.to_string())
                }
            };

            let _ = outcome_tx.send(outcome);
        });

        (
            Process { outcome: outcome_rx, child: child_slot },
            ChildPipes { stdout: stdout_rx, stderr: stderr_rx },
        )
    }

    /// Blocks until the child terminates (or its spawn/wait failed).
    pub async fn wait(&self) -> Result<i32, ProcessError> {
        let mut rx = self.outcome.clone();
        loop {
            match &*rx.borrow() {
                Outcome::Exited(code) => return Ok(*code),
                Outcome::SpawnFailed(err) => return Err(ProcessError::Spawn(err.clone())),
                Outcome::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(ProcessError::Wait("process outcome channel closed".into()));
            }
        }
    }

    /// The exit code, or [`RETURN_CODE_PENDING`] before completion.
    pub fn return_code(&self) -> i32 {
        match &*self.outcome.borrow() {
            Outcome::Exited(code) => *code,
            _ => RETURN_CODE_PENDING,
        }
    }

    /// Sends a kill signal to the child if it is still alive. Safe to call
    /// before `run`'s spawn completes, and idempotent after the child has
    /// already exited.
    pub async fn close(&self) {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // Match the common shell convention: bash returns 128 + signal.
        return status.signal().map(|s| 128 + s).unwrap_or(RETURN_CODE_PENDING);
    }
    #[cfg(not(unix))]
    {
        RETURN_CODE_PENDING
    }
}
