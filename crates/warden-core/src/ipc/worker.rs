//! Worker process plumbing.
//!
//! Provides `WorkerProcess`, an async handle to a spawned `warden-worker`
//! with its framed stdin/stdout split into a request queue and a response
//! stream.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{AdapterConfig, BOOTSTRAP_TIMEOUT_ENV};
use crate::context::{ContextEvent, ContextEvents};
use crate::error::{Error, Result};

use super::protocol::{Request, Response, read_frame, write_frame};

/// Environment variable overriding the worker binary location.
pub const WORKER_PATH_ENV: &str = "WARDEN_WORKER_PATH";

/// Environment variable telling the worker where the engine library lives.
pub const ENGINE_PATH_ENV: &str = "WARDEN_ENGINE_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "warden-worker.exe"
} else {
    "warden-worker"
};

/// Launch parameters for worker processes.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Path to the worker binary.
    pub worker_path: PathBuf,
    /// Engine library handed to the worker, if not left to its own lookup.
    pub engine_path: Option<PathBuf>,
    /// Adapter settings forwarded through the environment.
    pub adapter: AdapterConfig,
}

impl WorkerCommand {
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            engine_path: None,
            adapter: AdapterConfig::default(),
        }
    }

    /// Locate the worker binary.
    ///
    /// Looks for `warden-worker` in the following order:
    /// 1. `WARDEN_WORKER_PATH` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    /// 4. `target/debug` or `target/release` (development)
    pub fn locate() -> Result<Self> {
        find_worker_binary().map(Self::new)
    }
}

/// Find the warden-worker binary path.
fn find_worker_binary() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        let worker_path = exe_dir.join(WORKER_NAME);
        if worker_path.exists() {
            return Ok(worker_path);
        }
        // Test binaries live one level down, in target/<profile>/deps.
        if let Some(profile_dir) = exe_dir.parent() {
            let worker_path = profile_dir.join(WORKER_NAME);
            if worker_path.exists() {
                return Ok(worker_path);
            }
        }
    }

    if let Ok(path) = which::which(WORKER_NAME) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in &["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(WORKER_NAME);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Ipc(
        "Could not find warden-worker binary. Set WARDEN_WORKER_PATH or ensure it's in PATH."
            .to_string(),
    ))
}

/// Handle to a running worker process.
///
/// Requests are queued without blocking; a writer task frames them onto the
/// worker's stdin and a reader task decodes its stdout into `ContextEvent`s.
pub struct WorkerProcess {
    child: Option<Child>,
    requests: Option<mpsc::UnboundedSender<Request>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    pid: Option<u32>,
}

impl WorkerProcess {
    /// Spawn a worker and start its IO tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(command: &WorkerCommand, output: ContextEvents) -> Result<Self> {
        let mut cmd = Command::new(&command.worker_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Worker logs pass through for debugging
            .kill_on_drop(true)
            .env(
                BOOTSTRAP_TIMEOUT_ENV,
                command.adapter.bootstrap_timeout.as_millis().to_string(),
            );
        if let Some(engine_path) = &command.engine_path {
            cmd.env(ENGINE_PATH_ENV, engine_path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Ipc(format!(
                "Failed to spawn worker process '{}': {}",
                command.worker_path.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;

        let pid = child.id();
        let (requests, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_requests(stdin, queue, output.clone()));
        let reader = tokio::spawn(read_responses(stdout, output));

        tracing::debug!(pid = ?pid, worker = %command.worker_path.display(), "spawned worker");

        Ok(Self {
            child: Some(child),
            requests: Some(requests),
            writer,
            reader,
            pid,
        })
    }

    /// Queue a request for the worker.
    ///
    /// Fails once the worker has been killed or its writer has stopped.
    pub fn send(&self, request: Request) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Ipc("Worker has been killed".to_string()))?;
        requests
            .send(request)
            .map_err(|_| Error::Ipc("Worker stopped accepting requests".to_string()))
    }

    /// Process ID of the worker, if it was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the worker process immediately.
    ///
    /// The worker gets no chance to finish: a snippet stuck in a loop holds
    /// the worker's only thread, so nothing short of SIGKILL reclaims it.
    pub fn kill(&mut self) {
        // Closed first so nothing queued after this point is silently lost
        self.requests = None;

        let Some(mut child) = self.child.take() else {
            return;
        };

        self.writer.abort();
        self.reader.abort();

        if let Err(e) = child.start_kill() {
            // InvalidInput means the process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Reap in the background so no zombie is left behind
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = child.wait().await;
            });
        }

        tracing::debug!(pid = ?self.pid, "killed worker");
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        self.kill();
    }
}

async fn write_requests(
    mut stdin: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<Request>,
    output: ContextEvents,
) {
    while let Some(request) = queue.recv().await {
        if let Err(e) = write_frame(&mut stdin, &request).await {
            let _ = output.send(ContextEvent::Crashed {
                reason: e.to_string(),
            });
            return;
        }
    }
}

async fn read_responses(mut stdout: ChildStdout, output: ContextEvents) {
    loop {
        let event = match read_frame::<_, Response>(&mut stdout).await {
            Ok(Some(response)) => ContextEvent::Response(response),
            Ok(None) => ContextEvent::Crashed {
                reason: "worker exited".to_string(),
            },
            Err(e) => ContextEvent::Crashed {
                reason: e.to_string(),
            },
        };

        let closed = matches!(event, ContextEvent::Crashed { .. });
        if output.send(event).is_err() || closed {
            return;
        }
    }
}
