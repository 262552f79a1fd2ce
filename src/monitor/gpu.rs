//! GPU telemetry.

use std::process::Command;

use crate::core::errors::BatchError;

/// One GPU's utilization at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuReading {
    /// Compute utilization in percent.
    pub utilization: f64,
    /// Memory in use, in MB.
    pub memory_used_mb: f64,
}

/// Source of GPU counters.
pub trait GpuTelemetry: Send {
    /// Number of GPUs visible to this process.
    fn device_count(&self) -> Result<usize, BatchError>;

    /// Current readings for `devices`, in the same order.
    fn sample(&self, devices: &[u32]) -> Result<Vec<GpuReading>, BatchError>;
}

/// Queries the NVIDIA driver through `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: String,
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self {
            program: "nvidia-smi".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn query(&self, args: &[String]) -> Result<String, BatchError> {
        let output = Command::new(&self.program).args(args).output()?;
        if !output.status.success() {
            return Err(BatchError::config_error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `utilization.gpu, memory.used` CSV rows without header or units.
pub fn parse_query_output(output: &str) -> Result<Vec<GpuReading>, BatchError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| -> Result<GpuReading, BatchError> {
            let mut fields = line.split(',').map(str::trim);
            let mut next_number = || {
                fields
                    .next()
                    .and_then(|f| f.parse::<f64>().ok())
                    .ok_or_else(|| BatchError::invalid_input(format!("unexpected GPU query row '{line}'")))
            };
            Ok(GpuReading {
                utilization: next_number()?,
                memory_used_mb: next_number()?,
            })
        })
        .collect()
}

impl GpuTelemetry for NvidiaSmi {
    fn device_count(&self) -> Result<usize, BatchError> {
        let output = self.query(&["-L".to_string()])?;
        Ok(output.lines().filter(|l| l.starts_with("GPU ")).count())
    }

    fn sample(&self, devices: &[u32]) -> Result<Vec<GpuReading>, BatchError> {
        if devices.is_empty() {
            return Ok(Vec::new());
        }
        let ids = devices
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let output = self.query(&[
            "--query-gpu=utilization.gpu,memory.used".to_string(),
            "--format=csv,noheader,nounits".to_string(),
            format!("--id={ids}"),
        ])?;
        parse_query_output(&output)
    }
}

/// Telemetry for hosts without GPUs: nothing visible, nothing sampled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGpu;

impl GpuTelemetry for NoGpu {
    fn device_count(&self) -> Result<usize, BatchError> {
        Ok(0)
    }

    fn sample(&self, _devices: &[u32]) -> Result<Vec<GpuReading>, BatchError> {
        Ok(Vec::new())
    }
}
