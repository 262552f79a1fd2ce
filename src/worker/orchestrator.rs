//! Runs a batch across GPU workers.
//!
//! The orchestrator discovers input files, drops those the checkpoint already
//! marks done, deals the rest round-robin to one worker per GPU and watches
//! the workers' event streams. It never touches a document itself.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::launcher::{WorkerExit, WorkerHandle, WorkerLauncher};
use super::protocol::{RelayMessage, WorkerEvent, WorkerManifest};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::core::config::{GpuSelection, ParallelPolicy, RunConfig};
use crate::core::errors::BatchError;
use crate::domain::{DocumentId, DocumentKind};
use crate::monitor::{GpuTelemetry, NvidiaSmi, ResourceAverages, ResourceMonitor, ResourceSampler, SystemSampler};
use crate::pipeline::OutputLayout;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Files found under the input path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Root document identifiers are derived against.
    pub root: PathBuf,
    /// Accepted files, sorted.
    pub files: Vec<PathBuf>,
    /// Files whose content is not a PDF, JPEG or PNG.
    pub unsupported: Vec<PathBuf>,
    /// The input path named a single file.
    pub single_file: bool,
}

impl Discovery {
    pub fn id_of(&self, path: &Path) -> DocumentId {
        DocumentId::from_path(&self.root, path)
    }
}

/// Finds candidate documents under `input`.
///
/// A directory is walked recursively, skipping hidden files and `exclude`.
/// File types are sniffed from content, in parallel for large inputs.
pub fn discover(
    input: &Path,
    exclude: Option<&Path>,
    policy: &ParallelPolicy,
) -> Result<Discovery, BatchError> {
    let (root, candidates, single_file) = if input.is_file() {
        let root = input.parent().map(Path::to_path_buf).unwrap_or_default();
        (root, vec![input.to_path_buf()], true)
    } else {
        let mut files = Vec::new();
        collect_files(input, exclude, &mut files)?;
        files.sort();
        (input.to_path_buf(), files, false)
    };

    let sniff = |path: &PathBuf| matches!(DocumentKind::detect(path), Ok(Some(_)));
    let accepted: Vec<bool> = if policy.should_parallelize(candidates.len()) {
        candidates.par_iter().map(sniff).collect()
    } else {
        candidates.iter().map(sniff).collect()
    };

    let (files, unsupported): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .zip(accepted)
        .partition(|(_, ok)| *ok);

    let discovery = Discovery {
        root,
        files: files.into_iter().map(|(path, _)| path).collect(),
        unsupported: unsupported.into_iter().map(|(path, _)| path).collect(),
        single_file,
    };
    debug!(
        "Discovered {} files ({} unsupported) under {}",
        discovery.files.len(),
        discovery.unsupported.len(),
        input.display()
    );
    Ok(discovery)
}

fn collect_files(dir: &Path, exclude: Option<&Path>, files: &mut Vec<PathBuf>) -> io::Result<()> {
    if exclude.is_some_and(|excluded| same_path(dir, excluded)) {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, exclude, files)?;
        } else if !is_hidden(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Deals `files` to `gpus` in turn. GPUs left without files are dropped.
pub fn assign_round_robin(files: Vec<PathBuf>, gpus: &[u32]) -> Vec<(u32, Vec<PathBuf>)> {
    let mut buckets: Vec<(u32, Vec<PathBuf>)> = gpus.iter().map(|&gpu| (gpu, Vec::new())).collect();
    if buckets.is_empty() {
        return buckets;
    }
    let count = buckets.len();
    for (i, file) in files.into_iter().enumerate() {
        buckets[i % count].1.push(file);
    }
    buckets.retain(|(_, files)| !files.is_empty());
    buckets
}

/// Aggregates over every checkpoint entry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckpointTotals {
    pub word_count: usize,
    /// Seconds per page over successful entries; `None` when no page succeeded.
    pub average_time_per_page: Option<f64>,
}

impl CheckpointTotals {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let word_count = checkpoint.values().filter_map(|entry| entry.word_count).sum();
        let (seconds, pages) = checkpoint
            .values()
            .filter(|entry| entry.is_done() && entry.error.is_none())
            .fold((0.0f64, 0usize), |(seconds, pages), entry| {
                (seconds + entry.time_taken, pages + entry.num_pages.unwrap_or(0))
            });
        Self {
            word_count,
            average_time_per_page: (pages > 0).then(|| seconds / pages as f64),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Workers ran over the pending documents.
    Completed,
    /// Every discovered document was already done.
    NothingToDo,
    /// The single input file is not a supported type.
    UnsupportedInput,
}

/// What the binary reports after a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub total_files: usize,
    pub already_done: usize,
    pub scheduled: usize,
    /// GPUs whose worker never became ready.
    pub failed_workers: Vec<u32>,
    /// Workers that exited with a non-zero code.
    pub abnormal_exits: Vec<WorkerExit>,
    pub totals: CheckpointTotals,
    pub resources: ResourceAverages,
    pub elapsed: Duration,
}

impl RunSummary {
    fn empty(outcome: RunOutcome, total_files: usize, already_done: usize, elapsed: Duration) -> Self {
        Self {
            outcome,
            total_files,
            already_done,
            scheduled: 0,
            failed_workers: Vec::new(),
            abnormal_exits: Vec::new(),
            totals: CheckpointTotals::default(),
            resources: ResourceAverages::default(),
            elapsed,
        }
    }
}

/// Drives one run.
pub struct Orchestrator {
    config: RunConfig,
    launcher: Box<dyn WorkerLauncher>,
    telemetry: Box<dyn GpuTelemetry>,
    sampler: Option<Box<dyn ResourceSampler>>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, launcher: Box<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            telemetry: Box::new(NvidiaSmi::new()),
            sampler: None,
        }
    }

    /// Replaces the GPU telemetry used for `--gpus all` and for sampling.
    pub fn with_telemetry(mut self, telemetry: Box<dyn GpuTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replaces the sampler polled by the monitor.
    pub fn with_sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn run(self) -> Result<RunSummary, BatchError> {
        let start = Instant::now();
        let Self {
            config,
            launcher,
            telemetry,
            sampler,
        } = self;
        config.validate()?;

        let output = OutputLayout::new(&config.output_dir);
        let store = CheckpointStore::new(output.checkpoint_path());
        let completed = store.completed_ids()?;

        let discovery = discover(&config.input_path, Some(&config.output_dir), &config.parallel)?;
        if discovery.single_file && discovery.files.is_empty() {
            warn!("Unsupported file type: {}", config.input_path.display());
            return Ok(RunSummary::empty(RunOutcome::UnsupportedInput, 1, 0, start.elapsed()));
        }
        for path in &discovery.unsupported {
            debug!("Skipping unsupported file {}", path.display());
        }

        let total_files = discovery.files.len();
        let pending: Vec<PathBuf> = discovery
            .files
            .iter()
            .filter(|path| !completed.contains(discovery.id_of(path).as_str()))
            .cloned()
            .collect();
        let already_done = total_files - pending.len();
        if pending.is_empty() {
            info!("Total files scanned: {total_files}, out of which {already_done} are already processed.");
            return Ok(RunSummary::empty(RunOutcome::NothingToDo, total_files, already_done, start.elapsed()));
        }

        let visible = match config.gpus {
            GpuSelection::All => telemetry.device_count()?,
            GpuSelection::Devices(_) => 0,
        };
        let gpus = config.gpus.resolve(visible)?;
        let scheduled = pending.len();
        let assignments = assign_round_robin(pending, &gpus);
        fs::create_dir_all(&config.output_dir)?;

        let sampler: Box<dyn ResourceSampler> = match sampler {
            Some(sampler) => sampler,
            None => Box::new(SystemSampler::new(telemetry, gpus.clone())),
        };
        let monitor = ResourceMonitor::start(config.monitor_interval(), sampler)?;

        let (events, inbox) = mpsc::channel();
        let progress = Arc::new(AtomicUsize::new(0));
        let mut handles: Vec<Box<dyn WorkerHandle>> = Vec::new();
        let mut failed_workers = Vec::new();

        for (gpu, files) in assignments {
            info!("Starting worker on GPU {} with {} files", gpu, files.len());
            let manifest = WorkerManifest {
                gpu,
                device: gpu,
                files,
                input_root: discovery.root.clone(),
                output_dir: config.output_dir.clone(),
                options: config.options.clone(),
                backend: config.backend.clone(),
            };
            match launcher.launch(manifest, events.clone(), Arc::clone(&progress)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Could not start worker on GPU {}: {}", gpu, e);
                    failed_workers.push(gpu);
                }
            }
        }
        drop(events);

        let mut watch = Watch {
            inbox,
            poll: config.poll_interval(),
            awaiting_ready: handles.iter().map(|h| h.gpu()).collect(),
            open_streams: handles.iter().map(|h| h.gpu()).collect(),
            failed_workers,
        };

        let init_bar = progress_bar(config.show_progress, watch.awaiting_ready.len() as u64);
        init_bar.set_message("Initializing models on GPUs");
        watch.wait_for_readiness(&init_bar);
        init_bar.finish_and_clear();

        let overall = progress_bar(config.show_progress, total_files as u64);
        overall.set_message("Overall Progress");
        overall.set_position(already_done as u64);
        watch.follow_progress(&overall, &progress, already_done);
        overall.finish();

        let mut abnormal_exits = Vec::new();
        for handle in handles {
            let exit = handle.wait()?;
            if !exit.success() {
                warn!("Worker on GPU {} exited with {:?}", exit.gpu, exit.code);
                abnormal_exits.push(exit);
            }
        }

        let resources = monitor.stop().averages();
        let totals = CheckpointTotals::from_checkpoint(&store.read()?);

        Ok(RunSummary {
            outcome: RunOutcome::Completed,
            total_files,
            already_done,
            scheduled,
            failed_workers: watch.failed_workers,
            abnormal_exits,
            totals,
            resources,
            elapsed: start.elapsed(),
        })
    }
}

fn progress_bar(visible: bool, len: u64) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Orchestrator side of the worker event streams.
struct Watch {
    inbox: Receiver<RelayMessage>,
    poll: Duration,
    awaiting_ready: HashSet<u32>,
    open_streams: HashSet<u32>,
    failed_workers: Vec<u32>,
}

impl Watch {
    /// Blocks until every worker has signalled readiness or gone away.
    fn wait_for_readiness(&mut self, bar: &ProgressBar) {
        while !self.awaiting_ready.is_empty() {
            match self.inbox.recv_timeout(self.poll) {
                Ok(message) => {
                    if let Some(gpu) = self.handle(message) {
                        if self.awaiting_ready.remove(&gpu) {
                            bar.inc(1);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => bar.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for gpu in self.awaiting_ready.drain() {
            self.failed_workers.push(gpu);
        }
        info!("Pipeline warmed up");
    }

    /// Follows finished-document progress until every stream has closed.
    fn follow_progress(&mut self, bar: &ProgressBar, progress: &AtomicUsize, offset: usize) {
        while !self.open_streams.is_empty() {
            match self.inbox.recv_timeout(self.poll) {
                Ok(message) => {
                    self.handle(message);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            bar.set_position((offset + progress.load(Ordering::SeqCst)) as u64);
        }
        bar.set_position((offset + progress.load(Ordering::SeqCst)) as u64);
    }

    /// Applies one message. Returns the GPU whose readiness it settles, if any.
    fn handle(&mut self, message: RelayMessage) -> Option<u32> {
        match message {
            RelayMessage::Event(event) => match event {
                WorkerEvent::Ready { gpu } => {
                    debug!("Worker {} ready", gpu);
                    Some(gpu)
                }
                WorkerEvent::InitFailed {
                    gpu,
                    out_of_memory,
                    message,
                } => {
                    if out_of_memory {
                        error!("Worker {} ran out of GPU memory loading models: {}", gpu, message);
                    } else {
                        error!("Worker {} failed to initialize: {}", gpu, message);
                    }
                    if !self.failed_workers.contains(&gpu) {
                        self.failed_workers.push(gpu);
                    }
                    Some(gpu)
                }
                WorkerEvent::DocumentFinished {
                    gpu,
                    document_id,
                    status,
                } => {
                    debug!("Worker {} finished {} ({:?})", gpu, document_id, status);
                    None
                }
            },
            RelayMessage::Closed { gpu } => {
                self.open_streams.remove(&gpu);
                if self.awaiting_ready.contains(&gpu) {
                    warn!("Worker {} exited before reporting readiness", gpu);
                    if !self.failed_workers.contains(&gpu) {
                        self.failed_workers.push(gpu);
                    }
                    return Some(gpu);
                }
                None
            }
        }
    }
}
