//! Compilation-target descriptors.

use serde::{Deserialize, Serialize};

/// GPU architecture attributes the GPU passes and the emitter consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuArch {
    /// Compute capability, e.g. `(8, 0)` for `sm_80`
    pub compute_capability: (u32, u32),
    /// Maximum threads per block accepted by `normalize_threads`
    pub max_threads_per_block: u32,
    /// Shared memory per block, in bytes
    pub shared_mem_per_block: u32,
}

impl Default for GpuArch {
    fn default() -> Self {
        GpuArch {
            compute_capability: (7, 0),
            max_threads_per_block: 1024,
            shared_mem_per_block: 48 * 1024,
        }
    }
}

/// Where the lowered function will run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Cpu,
    Gpu(GpuArch),
}

impl Target {
    pub fn is_gpu(&self) -> bool {
        matches!(self, Target::Gpu(_))
    }
}

/// A concrete device: a target plus an ordinal on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub target: Target,
    pub ordinal: u32,
}

impl Device {
    pub fn new(target: Target, ordinal: u32) -> Self {
        Device { target, ordinal }
    }
}
