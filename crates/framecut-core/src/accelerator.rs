//! The accelerator contract.
//!
//! An accelerator executes a named per-pixel kernel over whole-frame planes.
//! Every operand is either a flat plane (one element per pixel) or a scalar.
//! A kernel returns one or more planes of the same length. CPU and GPU
//! implementations must agree on the math; the kernels are specified in
//! `framecut_render::kernels`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FrameCutError, FrameCutResult};

/// Kernel names understood by every built-in accelerator.
pub mod kernel {
    pub const OVERLAY: &str = "Overlay";
    pub const REMOVE_COLOR: &str = "RemoveColor";
    pub const ADD: &str = "Add";
    pub const MINUS: &str = "Minus";
    pub const MULTIPLY: &str = "Multiply";

    pub const ALL: [&str; 5] = [OVERLAY, REMOVE_COLOR, ADD, MINUS, MULTIPLY];
}

/// A single kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Plane(&'a [f32]),
    Scalar(f32),
}

impl<'a> Operand<'a> {
    pub fn as_plane(&self, position: usize) -> FrameCutResult<&'a [f32]> {
        match *self {
            Operand::Plane(p) => Ok(p),
            Operand::Scalar(_) => Err(FrameCutError::unsupported(format!(
                "operand {position} must be a plane, got a scalar"
            ))),
        }
    }

    pub fn as_scalar(&self, position: usize) -> FrameCutResult<f32> {
        match *self {
            Operand::Scalar(v) => Ok(v),
            Operand::Plane(_) => Err(FrameCutError::unsupported(format!(
                "operand {position} must be a scalar, got a plane"
            ))),
        }
    }
}

/// How kernel dispatches are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Dispatches may run side by side and split work across threads.
    #[default]
    Concurrent,
    /// Every dispatch holds one process-wide lock and drains the device before returning.
    Synchronous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    Cpu,
    Gpu,
}

impl fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorKind::Cpu => write!(f, "cpu"),
            AcceleratorKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// Uniform interface over GPU and CPU compute.
///
/// `compute` blocks the caller until the results are available.
/// Unknown kernels, wrong operand counts and scalar/plane mix-ups fail with
/// [`FrameCutError::UnsupportedOperation`].
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AcceleratorKind;

    fn execution_mode(&self) -> ExecutionMode;

    fn compute(&self, kernel: &str, operands: &[Operand<'_>]) -> FrameCutResult<Vec<Vec<f32>>>;
}

/// Fail with `UnsupportedOperation` unless exactly `expected` operands were passed.
pub fn expect_arity(kernel: &str, operands: &[Operand<'_>], expected: usize) -> FrameCutResult<()> {
    if operands.len() != expected {
        return Err(FrameCutError::unsupported(format!(
            "kernel `{kernel}` takes {expected} operands, got {}",
            operands.len()
        )));
    }
    Ok(())
}

/// Check that all planes share one length and return it.
pub fn common_len(planes: &[&[f32]]) -> FrameCutResult<usize> {
    let len = planes.first().map_or(0, |p| p.len());
    if planes.iter().any(|p| p.len() != len) {
        return Err(FrameCutError::unsupported(
            "operand planes differ in length".to_string(),
        ));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_accessors() {
        let plane = [1.0f32, 2.0];
        assert_eq!(Operand::Plane(&plane).as_plane(0).unwrap(), &plane);
        assert!(Operand::Plane(&plane).as_scalar(0).is_err());
        assert_eq!(Operand::Scalar(3.0).as_scalar(1).unwrap(), 3.0);
        assert!(matches!(
            Operand::Scalar(3.0).as_plane(1),
            Err(FrameCutError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_expect_arity() {
        let ops = [Operand::Scalar(1.0)];
        assert!(expect_arity("Overlay", &ops, 1).is_ok());
        assert!(expect_arity("Overlay", &ops, 4).is_err());
    }

    #[test]
    fn test_common_len() {
        let a = [0.0f32; 3];
        let b = [0.0f32; 3];
        let c = [0.0f32; 2];
        assert_eq!(common_len(&[&a, &b]).unwrap(), 3);
        assert!(common_len(&[&a, &c]).is_err());
    }
}
