//! GPU selection parsed from the command line.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::errors::BatchError;

/// Which GPU ordinals a run spreads its workers over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuSelection {
    /// Every GPU reported by the telemetry backend.
    All,
    /// An explicit list of ordinals, in the order given.
    Devices(Vec<u32>),
}

impl GpuSelection {
    /// Resolves the selection against the number of visible devices.
    pub fn resolve(&self, visible: usize) -> Result<Vec<u32>, BatchError> {
        match self {
            GpuSelection::All if visible == 0 => {
                Err(BatchError::config_error("no GPUs visible for --gpus all"))
            }
            GpuSelection::All => Ok((0..visible as u32).collect()),
            GpuSelection::Devices(ids) => Ok(ids.clone()),
        }
    }
}

impl FromStr for GpuSelection {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(GpuSelection::All);
        }

        let mut ids = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let id = part
                .parse::<u32>()
                .map_err(|_| BatchError::config_error(format!("invalid GPU id '{part}'")))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if ids.is_empty() {
            return Err(BatchError::config_error("no GPU ids given"));
        }
        Ok(GpuSelection::Devices(ids))
    }
}
