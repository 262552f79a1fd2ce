//! The worker loop: load the models once, then process documents one by one.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::protocol::{EventSink, WorkerEvent, WorkerManifest};
use crate::checkpoint::{CheckpointEntry, CheckpointStore};
use crate::core::errors::BatchError;
use crate::loader::{DocumentLoader, Rasterizer};
use crate::models::{ModelLoadError, ModelLoader};
use crate::pipeline::{OutputLayout, PipelineContext, process_document};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    ModelLoading,
    Ready,
    Processing,
    /// The last document was processed and recorded.
    Done,
    /// The last document failed and its error was recorded.
    Errored,
    Terminated,
}

impl WorkerState {
    /// Whether the worker loop may move from `self` to `next`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Uninitialized, ModelLoading)
                | (ModelLoading, Ready)
                | (ModelLoading, Terminated)
                | (Ready | Done | Errored, Processing)
                | (Processing, Done)
                | (Processing, Errored)
                | (Ready | Done | Errored, Terminated)
        )
    }
}

/// Why a worker stopped early.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Models could not be loaded; nothing was processed.
    #[error(transparent)]
    Init(#[from] ModelLoadError),

    /// A failure outside any single document, such as a corrupted checkpoint.
    #[error(transparent)]
    Fatal(#[from] BatchError),
}

/// Counts of a worker's finished documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub done: usize,
    pub failed: usize,
}

struct Worker<'a> {
    gpu: u32,
    state: WorkerState,
    sink: &'a mut dyn EventSink,
}

impl Worker<'_> {
    fn transition(&mut self, next: WorkerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "worker {}: {:?} -> {:?}",
            self.gpu,
            self.state,
            next
        );
        debug!("Worker {}: {:?} -> {:?}", self.gpu, self.state, next);
        self.state = next;
    }

    fn emit(&mut self, event: WorkerEvent) -> Result<(), BatchError> {
        self.sink.emit(&event)
    }
}

/// Runs one worker to completion.
///
/// Emits exactly one readiness event. Per-document failures are recorded in
/// the checkpoint and do not stop the loop.
pub fn run_worker(
    manifest: &WorkerManifest,
    loader: &dyn ModelLoader,
    rasterizer: Box<dyn Rasterizer>,
    sink: &mut dyn EventSink,
) -> Result<WorkerReport, WorkerError> {
    let mut worker = Worker {
        gpu: manifest.gpu,
        state: WorkerState::Uninitialized,
        sink,
    };

    worker.transition(WorkerState::ModelLoading);
    let models = match loader.load(manifest.device) {
        Ok(models) => models,
        Err(e) => {
            error!("Worker {} failed to load models: {}", manifest.gpu, e);
            worker.emit(WorkerEvent::InitFailed {
                gpu: manifest.gpu,
                out_of_memory: e.is_out_of_memory(),
                message: e.to_string(),
            })?;
            worker.transition(WorkerState::Terminated);
            return Err(WorkerError::Init(e));
        }
    };

    let output = OutputLayout::new(&manifest.output_dir);
    let checkpoint = CheckpointStore::new(output.checkpoint_path());
    let ctx = PipelineContext::new(
        models,
        DocumentLoader::new(rasterizer),
        output,
        manifest.options.clone(),
    );

    worker.transition(WorkerState::Ready);
    worker.emit(WorkerEvent::Ready { gpu: manifest.gpu })?;
    info!("Worker {} ready with {} documents", manifest.gpu, manifest.files.len());

    let mut report = WorkerReport::default();
    for job in manifest.jobs() {
        worker.transition(WorkerState::Processing);
        let (entry, finished) = match process_document(&ctx, &job) {
            Ok(outcome) => {
                report.done += 1;
                let entry = CheckpointEntry::done(
                    outcome.word_count,
                    outcome.num_pages,
                    outcome.confidence,
                    outcome.elapsed,
                );
                (entry, WorkerState::Done)
            }
            Err(failure) => {
                report.failed += 1;
                warn!("Failed to process {}", job.id);
                if ctx.options.debug {
                    error!("{}: {}", job.id, failure.message);
                }
                (CheckpointEntry::failed(failure.message, failure.elapsed), WorkerState::Errored)
            }
        };

        let status = entry.status;
        checkpoint.update(job.id.as_str(), entry).map_err(BatchError::from)?;
        worker.emit(WorkerEvent::DocumentFinished {
            gpu: manifest.gpu,
            document_id: job.id.to_string(),
            status,
        })?;
        worker.transition(finished);
    }

    drop(ctx);
    worker.transition(WorkerState::Terminated);
    info!(
        "Worker {} finished: {} done, {} failed",
        manifest.gpu, report.done, report.failed
    );
    Ok(report)
}
