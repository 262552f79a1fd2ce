//! Starting workers and relaying their events.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::process::{WorkerError, run_worker};
use super::protocol::{RelayMessage, RelaySink, WorkerEvent, WorkerManifest};
use crate::core::constants::WORKER_INIT_FAILED_EXIT_CODE;
use crate::core::errors::BatchError;
use crate::loader::Rasterizer;
use crate::models::ModelLoader;

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub gpu: u32,
    /// Exit code; `None` when the worker was killed or panicked.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running worker.
pub trait WorkerHandle: Send {
    fn gpu(&self) -> u32;

    /// Blocks until the worker has exited and its event stream is drained.
    fn wait(self: Box<Self>) -> Result<WorkerExit, BatchError>;
}

/// Starts workers.
pub trait WorkerLauncher {
    /// Starts one worker for `manifest`.
    ///
    /// Its events are relayed to `events`, finished documents increment
    /// `progress`, and a [`RelayMessage::Closed`] follows the last event.
    fn launch(
        &self,
        manifest: WorkerManifest,
        events: Sender<RelayMessage>,
        progress: Arc<AtomicUsize>,
    ) -> Result<Box<dyn WorkerHandle>, BatchError>;
}

/// Runs each worker as a child process bound to its GPU.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
        }
    }

    /// Re-invokes the running executable with the `worker` subcommand.
    pub fn current_exe() -> Result<Self, BatchError> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        mut manifest: WorkerManifest,
        events: Sender<RelayMessage>,
        progress: Arc<AtomicUsize>,
    ) -> Result<Box<dyn WorkerHandle>, BatchError> {
        let gpu = manifest.gpu;
        // CUDA_VISIBLE_DEVICES renumbers the bound GPU to 0 inside the child
        manifest.device = 0;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CUDA_VISIBLE_DEVICES", gpu.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!("Spawned worker {} as pid {}", gpu, child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BatchError::config_error("worker stdout was not captured"))?;
        let relay_sink = RelaySink::new(events, progress);
        let relay = thread::Builder::new()
            .name(format!("relay-gpu{gpu}"))
            .spawn(move || relay_lines(gpu, BufReader::new(stdout), &relay_sink))?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = serde_json::to_writer(&mut stdin, &manifest)
                .map_err(BatchError::from)
                .and_then(|_| stdin.flush().map_err(BatchError::from));
            if let Err(e) = written {
                warn!("Could not send manifest to worker {}: {}", gpu, e);
            }
        }

        Ok(Box::new(ProcessHandle { gpu, child, relay }))
    }
}

/// Relays a worker's stdout until it closes.
fn relay_lines(gpu: u32, reader: impl BufRead, sink: &RelaySink) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Lost event stream of worker {}: {}", gpu, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match WorkerEvent::parse_line(&line) {
            Ok(event) => sink.forward(event),
            Err(_) => debug!("worker {}: {}", gpu, line),
        }
    }
    sink.close(gpu);
}

struct ProcessHandle {
    gpu: u32,
    child: Child,
    relay: JoinHandle<()>,
}

impl WorkerHandle for ProcessHandle {
    fn gpu(&self) -> u32 {
        self.gpu
    }

    fn wait(mut self: Box<Self>) -> Result<WorkerExit, BatchError> {
        let status = self.child.wait()?;
        if self.relay.join().is_err() {
            warn!("Relay thread of worker {} panicked", self.gpu);
        }
        Ok(WorkerExit {
            gpu: self.gpu,
            code: status.code(),
        })
    }
}

/// Builds a fresh rasterizer inside each worker thread.
pub type RasterizerFactory = Arc<dyn Fn() -> Box<dyn Rasterizer> + Send + Sync>;

/// Runs each worker on a thread of the current process.
///
/// Exit codes mirror the worker binary: 0 on success,
/// [`WORKER_INIT_FAILED_EXIT_CODE`] when models fail to load, 1 otherwise.
#[derive(Clone)]
pub struct ThreadLauncher {
    loader: Arc<dyn ModelLoader>,
    rasterizer: RasterizerFactory,
}

impl ThreadLauncher {
    pub fn new(loader: Arc<dyn ModelLoader>, rasterizer: RasterizerFactory) -> Self {
        Self { loader, rasterizer }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(
        &self,
        manifest: WorkerManifest,
        events: Sender<RelayMessage>,
        progress: Arc<AtomicUsize>,
    ) -> Result<Box<dyn WorkerHandle>, BatchError> {
        let gpu = manifest.gpu;
        let loader = Arc::clone(&self.loader);
        let rasterizer = Arc::clone(&self.rasterizer);

        let handle = thread::Builder::new()
            .name(format!("worker-gpu{gpu}"))
            .spawn(move || {
                let mut sink = RelaySink::new(events, progress);
                let result = run_worker(&manifest, loader.as_ref(), rasterizer(), &mut sink);
                sink.close(gpu);
                exit_code(&result)
            })?;

        Ok(Box::new(ThreadHandle { gpu, handle }))
    }
}

/// Process exit code for a worker result.
pub fn exit_code<T>(result: &Result<T, WorkerError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(WorkerError::Init(_)) => WORKER_INIT_FAILED_EXIT_CODE,
        Err(WorkerError::Fatal(_)) => 1,
    }
}

struct ThreadHandle {
    gpu: u32,
    handle: JoinHandle<i32>,
}

impl WorkerHandle for ThreadHandle {
    fn gpu(&self) -> u32 {
        self.gpu
    }

    fn wait(self: Box<Self>) -> Result<WorkerExit, BatchError> {
        let code = match self.handle.join() {
            Ok(code) => Some(code),
            Err(_) => {
                warn!("Worker thread {} panicked", self.gpu);
                None
            }
        };
        Ok(WorkerExit { gpu: self.gpu, code })
    }
}
