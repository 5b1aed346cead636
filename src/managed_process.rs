//! Wraps [`crate::process::Process`] with stdout/stderr log capture and
//! restart discipline (spec.md §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;

use crate::error::ManagedProcessError;
use crate::process::{ChildPipes, Process};
use crate::spec::{LogRecord, RestartPolicy};

/// Chunk size used by the stdout/stderr reader tasks.
const READ_BUFFER_SIZE: usize = 1024;
/// Depth of the internal queue between the reader tasks and the forwarding
/// task (the two-stage queue that insulates the child's pipe from a slow
/// external consumer).
const INTERNAL_LOG_DEPTH: usize = 1024;

type OnExit = Arc<dyn Fn(i32) + Send + Sync>;

struct Wiring {
    cancel: Arc<Notify>,
    current_process: Arc<Mutex<Option<Arc<Process>>>>,
    stdout_handles: mpsc::Sender<ChildStdout>,
    stderr_handles: mpsc::Sender<ChildStderr>,
}

pub struct ManagedProcess {
    name: String,
    shell: String,
    command: String,
    env: Vec<(String, String)>,
    inherit_env: bool,
    restart_policy: RestartPolicy,
    restart_wait: Duration,
    output: mpsc::Sender<LogRecord>,
    on_exit: OnExit,
    running: Arc<AtomicBool>,
    wiring: Mutex<Option<Wiring>>,
    op_lock: Mutex<()>,
}

impl ManagedProcess {
    /// `output` is the queue log records are eventually forwarded into
    /// (typically a [`crate::service::Service`]'s log channel). `on_exit` is
    /// invoked once per child termination, before the restart decision is
    /// made.
    pub fn new(
        name: impl Into<String>,
        shell: impl Into<String>,
        command: impl Into<String>,
        env: Vec<(String, String)>,
        inherit_env: bool,
        restart_policy: RestartPolicy,
        restart_wait: Duration,
        output: mpsc::Sender<LogRecord>,
        on_exit: impl Fn(i32) + Send + Sync + 'static,
    ) -> Self {
        ManagedProcess {
            name: name.into(),
            shell: shell.into(),
            command: command.into(),
            env,
            inherit_env,
            restart_policy,
            restart_wait,
            output,
            on_exit: Arc::new(on_exit),
            running: Arc::new(AtomicBool::new(false)),
            wiring: Mutex::new(None),
            op_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fails if already running. Spawns the child, two reader tasks, an
    /// internal-log forwarder task, and the lifecycle task, then returns.
    pub async fn start(&self) -> Result<(), ManagedProcessError> {
        let _op = self.op_lock.lock().await;
        if self.running.load(Ordering::Acquire) {
            return Err(ManagedProcessError::AlreadyRunning);
        }

        let cancel = Arc::new(Notify::new());
        let current_process: Arc<Mutex<Option<Arc<Process>>>> = Arc::new(Mutex::new(None));
        let (stdout_handles_tx, stdout_handles_rx) = mpsc::channel::<ChildStdout>(1);
        let (stderr_handles_tx, stderr_handles_rx) = mpsc::channel::<ChildStderr>(1);
        let (internal_tx, internal_rx) = mpsc::channel::<LogRecord>(INTERNAL_LOG_DEPTH);

        let (process, pipes) = Process::run(
            &self.shell,
            &self.command,
            &self.env,
            self.inherit_env,
            self.name.clone(),
        );

        self.running.store(true, Ordering::Release);
        *self.wiring.lock().await = Some(Wiring {
            cancel: cancel.clone(),
            current_process: current_process.clone(),
            stdout_handles: stdout_handles_tx.clone(),
            stderr_handles: stderr_handles_tx.clone(),
        });

        spawn_reader(self.name.clone(), stdout_handles_rx, internal_tx.clone());
        spawn_reader_stderr(self.name.clone(), stderr_handles_rx, internal_tx.clone());
        spawn_forwarder(internal_rx, self.output.clone());

        tokio::spawn(run_lifecycle(LifecycleArgs {
            name: self.name.clone(),
            restart_policy: self.restart_policy,
            restart_wait: self.restart_wait,
            shell: self.shell.clone(),
            command: self.command.clone(),
            env: self.env.clone(),
            inherit_env: self.inherit_env,
            on_exit: self.on_exit.clone(),
            running: self.running.clone(),
            cancel,
            current_process,
            stdout_handles: stdout_handles_tx,
            stderr_handles: stderr_handles_tx,
            process,
            pipes,
        }));

        debug!(service = %self.name, "managed process started");
        Ok(())
    }

    /// Fails if not running. Stops the lifecycle loop, kills the current
    /// child, and tears down the reader/forwarder tasks.
    pub async fn stop(&self) -> Result<(), ManagedProcessError> {
        let _op = self.op_lock.lock().await;
        if !self.running.load(Ordering::Acquire) {
            return Err(ManagedProcessError::NotRunning);
        }
        self.running.store(false, Ordering::Release);

        if let Some(wiring) = self.wiring.lock().await.take() {
            wiring.cancel.notify_one();
            if let Some(process) = wiring.current_process.lock().await.take() {
                process.close().await;
            }
            // Dropping the handle senders lets the reader tasks drain and
            // exit once they observe the channel close.
            drop(wiring.stdout_handles);
            drop(wiring.stderr_handles);
        }

        debug!(service = %self.name, "managed process stopped");
        Ok(())
    }
}

struct LifecycleArgs {
    name: String,
    restart_policy: RestartPolicy,
    restart_wait: Duration,
    shell: String,
    command: String,
    env: Vec<(String, String)>,
    inherit_env: bool,
    on_exit: OnExit,
    running: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    current_process: Arc<Mutex<Option<Arc<Process>>>>,
    stdout_handles: mpsc::Sender<ChildStdout>,
    stderr_handles: mpsc::Sender<ChildStderr>,
    process: Process,
    pipes: ChildPipes,
}

/// Drives one child through its full restart lifecycle, relaying each
/// respawned child's stdout/stderr handles to the long-lived reader tasks so
/// that log subscribers observe a continuous stream across restarts.
async fn run_lifecycle(args: LifecycleArgs) {
    let LifecycleArgs {
        name,
        restart_policy,
        restart_wait,
        shell,
        command,
        env,
        inherit_env,
        on_exit,
        running,
        cancel,
        current_process,
        stdout_handles,
        stderr_handles,
        mut process,
        mut pipes,
    } = args;

    loop {
        if let Ok(stdout) = pipes.stdout.await {
            let _ = stdout_handles.send(stdout).await;
        }
        if let Ok(stderr) = pipes.stderr.await {
            let _ = stderr_handles.send(stderr).await;
        }

        let process_ref = Arc::new(process);
        *current_process.lock().await = Some(process_ref.clone());

        let outcome = tokio::select! {
            _ = cancel.notified() => {
                process_ref.close().await;
                return;
            }
            result = process_ref.wait() => result,
        };

        let code = outcome.unwrap_or(crate::process::RETURN_CODE_PENDING);
        (on_exit)(code);

        let should_restart = match restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::UnlessStopped => true,
            RestartPolicy::OnFailure => code != 0,
        };

        if !should_restart {
            running.store(false, Ordering::Release);
            return;
        }

        tokio::select! {
            _ = cancel.notified() => return,
            _ = tokio::time::sleep(restart_wait) => {}
        }

        if !running.load(Ordering::Acquire) {
            return;
        }

        let (new_process, new_pipes) = Process::run(&shell, &command, &env, inherit_env, name.clone());
        process = new_process;
        pipes = new_pipes;
    }
}

fn spawn_reader(
    name: String,
    mut handles: mpsc::Receiver<ChildStdout>,
    internal_tx: mpsc::Sender<LogRecord>,
) {
    tokio::spawn(async move {
        while let Some(mut stream) = handles.recv().await {
            loop {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let record = LogRecord::new(name.clone(), true, buf[..n].to_vec());
                        // Non-blocking: drop if the internal queue is full.
                        let _ = internal_tx.try_send(record);
                    }
                    Err(_) => break,
                }
            }
        }
    });
}

// stderr reads share the exact same loop shape as stdout; ChildStderr is a
// distinct type so the reader is duplicated rather than generic over
// AsyncRead, matching how stdout/stderr are handled as separate pipes
// throughout this module.
fn spawn_reader_stderr(
    name: String,
    mut handles: mpsc::Receiver<ChildStderr>,
    internal_tx: mpsc::Sender<LogRecord>,
) {
    tokio::spawn(async move {
        while let Some(mut stream) = handles.recv().await {
            loop {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let record = LogRecord::new(name.clone(), false, buf[..n].to_vec());
                        let _ = internal_tx.try_send(record);
                    }
                    Err(_) => break,
                }
            }
        }
    });
}

fn spawn_forwarder(mut internal_rx: mpsc::Receiver<LogRecord>, output: mpsc::Sender<LogRecord>) {
    tokio::spawn(async move {
        while let Some(record) = internal_rx.recv().await {
            if output.send(record).await.is_err() {
                break;
            }
        }
    });
}
