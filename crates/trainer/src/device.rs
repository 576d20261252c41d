//! Device selection

use std::fmt;

use runtime_core::config::{DeviceConfig, Platform};
use runtime_core::WorkerIndex;
use serde::{Deserialize, Serialize};

/// Compute device a model runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl Device {
    /// Pick a device by worker index
    ///
    /// Workers sharing a host are spread round-robin over its accelerators.
    pub fn for_worker(config: &DeviceConfig, worker: WorkerIndex) -> Self {
        match config.platform {
            Platform::Cpu => Device::Cpu,
            Platform::Gpu => Device::Gpu(worker % config.gpu_count.max(1)),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu(id) => write!(f, "cuda:{}", id),
        }
    }
}
