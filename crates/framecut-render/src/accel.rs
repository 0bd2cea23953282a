//! Accelerator implementations and device selection.

use std::sync::Arc;

use parking_lot::Mutex;

use framecut_core::config::{AcceleratorConfig, AcceleratorSelector};
use framecut_core::{
    Accelerator, AcceleratorKind, ExecutionMode, FrameCutError, FrameCutResult, Operand,
};

use crate::kernels;

/// Held for the whole of every dispatch made in [`ExecutionMode::Synchronous`],
/// across all accelerators in the process.
pub(crate) static DISPATCH_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Kernels executed on the host.
pub struct CpuAccelerator {
    mode: ExecutionMode,
}

impl CpuAccelerator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

impl Default for CpuAccelerator {
    fn default() -> Self {
        Self::new(ExecutionMode::Concurrent)
    }
}

impl Accelerator for CpuAccelerator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Cpu
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn compute(&self, kernel: &str, operands: &[Operand<'_>]) -> FrameCutResult<Vec<Vec<f32>>> {
        match self.mode {
            ExecutionMode::Concurrent => kernels::run(kernel, operands, true),
            ExecutionMode::Synchronous => {
                let _guard = DISPATCH_LOCK.lock();
                kernels::run(kernel, operands, false)
            }
        }
    }
}

/// Build the accelerator requested by the configuration.
///
/// `auto` prefers a GPU and falls back to the CPU. An explicit `gpu` fails
/// with [`FrameCutError::Device`] when no adapter matches the device id or
/// the crate was built without the `gpu` feature.
pub fn create_accelerator(config: &AcceleratorConfig) -> FrameCutResult<Arc<dyn Accelerator>> {
    let mode = config.execution_mode();
    match config.selector {
        AcceleratorSelector::Cpu => Ok(Arc::new(CpuAccelerator::new(mode))),
        AcceleratorSelector::Gpu => gpu_accelerator(config.device_id, mode),
        AcceleratorSelector::Auto => match gpu_accelerator(config.device_id, mode) {
            Ok(gpu) => Ok(gpu),
            Err(err) => {
                tracing::info!("No usable GPU ({}), using the CPU accelerator", err);
                Ok(Arc::new(CpuAccelerator::new(mode)))
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn gpu_accelerator(device_id: usize, mode: ExecutionMode) -> FrameCutResult<Arc<dyn Accelerator>> {
    Ok(Arc::new(crate::gpu::GpuAccelerator::new(device_id, mode)?))
}

#[cfg(not(feature = "gpu"))]
fn gpu_accelerator(_device_id: usize, _mode: ExecutionMode) -> FrameCutResult<Arc<dyn Accelerator>> {
    Err(FrameCutError::Device(
        "built without GPU support (enable the `gpu` feature)".to_string(),
    ))
}
