use std::sync::Arc;

use framecut_core::{Accelerator, Computer, FrameCutResult, Operand};

/// A kernel name bound to the accelerator that executes it.
pub struct KernelComputer {
    kernel: String,
    accelerator: Arc<dyn Accelerator>,
}

impl KernelComputer {
    pub fn new(kernel: impl Into<String>, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            kernel: kernel.into(),
            accelerator,
        }
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accelerator
    }
}

impl Computer for KernelComputer {
    fn kernel(&self) -> &str {
        &self.kernel
    }

    fn compute(&self, operands: &[Operand<'_>]) -> FrameCutResult<Vec<Vec<f32>>> {
        tracing::trace!(
            "Dispatching {} on {} with {} operands",
            self.kernel,
            self.accelerator.name(),
            operands.len()
        );
        self.accelerator.compute(&self.kernel, operands)
    }
}
