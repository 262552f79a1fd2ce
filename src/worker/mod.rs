//! Worker processes and the orchestrator that supervises them.
//!
//! One worker runs per GPU. It loads the model suite once, announces
//! readiness and processes its share of documents in order, recording each
//! attempt in the checkpoint. The orchestrator only schedules, relays
//! progress and summarizes.

pub mod launcher;
pub mod orchestrator;
pub mod process;
pub mod protocol;

pub use launcher::{
    ProcessLauncher, RasterizerFactory, ThreadLauncher, WorkerExit, WorkerHandle, WorkerLauncher,
    exit_code,
};
pub use orchestrator::{
    CheckpointTotals, Discovery, Orchestrator, RunOutcome, RunSummary, assign_round_robin, discover,
};
pub use process::{WorkerError, WorkerReport, WorkerState, run_worker};
pub use protocol::{EventSink, RelayMessage, RelaySink, StdoutSink, WorkerEvent, WorkerManifest};
