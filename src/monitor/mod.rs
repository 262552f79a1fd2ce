//! Background resource sampling for a run.
//!
//! A single thread in the orchestrator process samples CPU, resident memory
//! and GPU counters at a fixed interval. The accumulator lives on that thread
//! and is handed back when the monitor is stopped, so it is written by one
//! thread and read only after the workers have been joined.

mod gpu;

pub use gpu::{GpuReading, GpuTelemetry, NoGpu, NvidiaSmi, parse_query_output};

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::core::errors::BatchError;

/// One sampling tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSample {
    /// CPU usage in percent of one core, summed over the process tree.
    pub cpu_percent: f64,
    /// Resident memory in MB, summed over the process tree.
    pub rss_mb: f64,
    /// Readings for the monitored GPUs; empty when unavailable.
    pub gpus: Vec<GpuReading>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Running sums and counts of every sampled counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceStats {
    cpu: RunningMean,
    ram: RunningMean,
    gpu_util: RunningMean,
    gpu_mem: RunningMean,
}

impl ResourceStats {
    /// Adds one tick. GPU readings are averaged across devices first.
    pub fn record(&mut self, sample: &ResourceSample) {
        self.cpu.add(sample.cpu_percent);
        self.ram.add(sample.rss_mb);
        if !sample.gpus.is_empty() {
            let n = sample.gpus.len() as f64;
            self.gpu_util
                .add(sample.gpus.iter().map(|g| g.utilization).sum::<f64>() / n);
            self.gpu_mem
                .add(sample.gpus.iter().map(|g| g.memory_used_mb).sum::<f64>() / n);
        }
    }

    pub fn samples(&self) -> u64 {
        self.cpu.count
    }

    /// Means over all ticks; a counter never sampled averages 0.0.
    pub fn averages(&self) -> ResourceAverages {
        ResourceAverages {
            cpu_percent: self.cpu.mean(),
            rss_mb: self.ram.mean(),
            gpu_utilization: self.gpu_util.mean(),
            gpu_memory_mb: self.gpu_mem.mean(),
        }
    }
}

/// Mean utilization over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceAverages {
    pub cpu_percent: f64,
    pub rss_mb: f64,
    pub gpu_utilization: f64,
    pub gpu_memory_mb: f64,
}

/// Produces one [`ResourceSample`] per tick.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Samples this process and its direct children with `sysinfo`, plus GPU telemetry.
pub struct SystemSampler {
    system: System,
    root: Option<Pid>,
    telemetry: Box<dyn GpuTelemetry>,
    devices: Vec<u32>,
    gpu_warned: bool,
}

impl SystemSampler {
    pub fn new(telemetry: Box<dyn GpuTelemetry>, devices: Vec<u32>) -> Self {
        let root = sysinfo::get_current_pid()
            .map_err(|e| warn!("Cannot resolve own pid, CPU and RAM will not be sampled: {e}"))
            .ok();
        Self {
            system: System::new(),
            root,
            telemetry,
            devices,
            gpu_warned: false,
        }
    }

    fn process_tree(&mut self) -> (f64, f64) {
        let Some(root) = self.root else {
            return (0.0, 0.0);
        };
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let (cpu, bytes) = self
            .system
            .processes()
            .iter()
            .filter(|(pid, process)| **pid == root || process.parent() == Some(root))
            .fold((0.0f64, 0u64), |(cpu, bytes), (_, process)| {
                (cpu + process.cpu_usage() as f64, bytes + process.memory())
            });

        (cpu, bytes as f64 / (1024.0 * 1024.0))
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&mut self) -> ResourceSample {
        let (cpu_percent, rss_mb) = self.process_tree();
        let gpus = match self.telemetry.sample(&self.devices) {
            Ok(readings) => readings,
            Err(e) => {
                if !self.gpu_warned {
                    debug!("GPU telemetry unavailable: {e}");
                    self.gpu_warned = true;
                }
                Vec::new()
            }
        };
        ResourceSample {
            cpu_percent,
            rss_mb,
            gpus,
        }
    }
}

/// Handle on the sampling thread.
pub struct ResourceMonitor {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<ResourceStats>,
}

impl ResourceMonitor {
    /// Starts sampling `sampler` every `interval`, beginning immediately.
    pub fn start(interval: Duration, mut sampler: Box<dyn ResourceSampler>) -> Result<Self, BatchError> {
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("resource-monitor".into())
            .spawn(move || {
                let mut stats = ResourceStats::default();
                loop {
                    stats.record(&sampler.sample());
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                stats
            })?;

        Ok(Self { stop, handle })
    }

    /// Stops sampling and returns everything recorded.
    pub fn stop(self) -> ResourceStats {
        let _ = self.stop.send(());
        self.handle.join().unwrap_or_else(|_| {
            warn!("Resource monitor thread panicked, reporting no samples");
            ResourceStats::default()
        })
    }
}
