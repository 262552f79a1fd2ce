//! What the orchestrator and its workers say to each other.
//!
//! The orchestrator hands a worker its [`WorkerManifest`] as JSON on stdin.
//! The worker answers with newline-delimited [`WorkerEvent`]s on stdout:
//! exactly one readiness event (`ready` or `init_failed`), then one
//! `document_finished` per processed document.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStatus;
use crate::core::config::PipelineOptions;
use crate::core::errors::BatchError;
use crate::domain::DocumentJob;
use crate::models::BackendConfig;

/// One line of a worker's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// All four models are loaded.
    Ready { gpu: u32 },
    /// Models could not be loaded; the worker exits without processing.
    InitFailed {
        gpu: u32,
        out_of_memory: bool,
        message: String,
    },
    /// A document's checkpoint entry has been written.
    DocumentFinished {
        gpu: u32,
        document_id: String,
        status: CheckpointStatus,
    },
}

impl WorkerEvent {
    pub fn gpu(&self) -> u32 {
        match self {
            WorkerEvent::Ready { gpu }
            | WorkerEvent::InitFailed { gpu, .. }
            | WorkerEvent::DocumentFinished { gpu, .. } => *gpu,
        }
    }

    /// Whether this event satisfies the worker's one-time readiness signal.
    pub fn is_readiness(&self) -> bool {
        matches!(self, WorkerEvent::Ready { .. } | WorkerEvent::InitFailed { .. })
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Everything a worker needs to know about its share of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerManifest {
    /// Physical GPU ordinal, used for reporting.
    pub gpu: u32,
    /// Device ordinal the models load on, as seen by the worker.
    #[serde(default)]
    pub device: u32,
    pub files: Vec<PathBuf>,
    /// Root the document identifiers are derived against.
    pub input_root: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub options: PipelineOptions,
    pub backend: BackendConfig,
}

impl WorkerManifest {
    pub fn jobs(&self) -> Vec<DocumentJob> {
        self.files
            .iter()
            .map(|path| DocumentJob::new(&self.input_root, path.clone()))
            .collect()
    }
}

/// Destination of a worker's events.
pub trait EventSink: Send {
    fn emit(&mut self, event: &WorkerEvent) -> Result<(), BatchError>;
}

/// Writes events as JSON lines to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&mut self, event: &WorkerEvent) -> Result<(), BatchError> {
        let line = event.to_line()?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }
}

/// Message delivered to the orchestrator's event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event(WorkerEvent),
    /// The worker's event stream ended.
    Closed { gpu: u32 },
}

/// Forwards events to the orchestrator, counting finished documents.
#[derive(Debug, Clone)]
pub struct RelaySink {
    events: Sender<RelayMessage>,
    progress: Arc<AtomicUsize>,
}

impl RelaySink {
    pub fn new(events: Sender<RelayMessage>, progress: Arc<AtomicUsize>) -> Self {
        Self { events, progress }
    }

    /// Relays one event. A receiver that has gone away is not an error.
    pub fn forward(&self, event: WorkerEvent) {
        if matches!(event, WorkerEvent::DocumentFinished { .. }) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
        let _ = self.events.send(RelayMessage::Event(event));
    }

    pub fn close(&self, gpu: u32) {
        let _ = self.events.send(RelayMessage::Closed { gpu });
    }
}

impl EventSink for RelaySink {
    fn emit(&mut self, event: &WorkerEvent) -> Result<(), BatchError> {
        self.forward(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_event_wire_format() {
        let event = WorkerEvent::InitFailed {
            gpu: 1,
            out_of_memory: true,
            message: "CUDA out of memory".into(),
        };
        let line = event.to_line().unwrap();
        assert_eq!(
            line,
            r#"{"event":"init_failed","gpu":1,"out_of_memory":true,"message":"CUDA out of memory"}"#
        );
        assert_eq!(WorkerEvent::parse_line(&format!("{line}\n")).unwrap(), event);

        let finished = WorkerEvent::parse_line(
            r#"{"event":"document_finished","gpu":0,"document_id":"a↳b","status":"error"}"#,
        )
        .unwrap();
        assert_eq!(finished.gpu(), 0);
        assert!(!finished.is_readiness());
        assert!(WorkerEvent::Ready { gpu: 2 }.is_readiness());
        assert!(event.is_readiness());
    }

    #[test]
    fn test_manifest_defaults_and_jobs() {
        let manifest: WorkerManifest = serde_json::from_str(
            r#"{
                "gpu": 3,
                "files": ["/in/a/x.pdf", "/in/y.png"],
                "input_root": "/in",
                "output_dir": "/out",
                "backend": {"kind": "replay", "dir": "/preds"}
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.device, 0);
        assert_eq!(manifest.options, PipelineOptions::default());
        let ids: Vec<String> = manifest.jobs().iter().map(|j| j.id.to_string()).collect();
        assert_eq!(ids, ["a↳x", "y"]);
    }

    #[test]
    fn test_relay_sink_counts_finished_documents() {
        let (tx, rx) = mpsc::channel();
        let progress = Arc::new(AtomicUsize::new(5));
        let mut sink = RelaySink::new(tx, Arc::clone(&progress));

        sink.emit(&WorkerEvent::Ready { gpu: 0 }).unwrap();
        sink.emit(&WorkerEvent::DocumentFinished {
            gpu: 0,
            document_id: "d".into(),
            status: CheckpointStatus::Done,
        })
        .unwrap();
        sink.close(0);

        assert_eq!(progress.load(Ordering::SeqCst), 6);
        let messages: Vec<_> = rx.try_iter().collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], RelayMessage::Closed { gpu: 0 });
    }
}
