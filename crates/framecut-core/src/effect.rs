use crate::accelerator::Operand;
use crate::error::FrameCutResult;
use crate::picture::Picture;
use crate::plugin::PluginRegistry;

/// A named kernel bound to an accelerator.
pub trait Computer: Send + Sync {
    /// The kernel this computer runs.
    fn kernel(&self) -> &str;

    fn compute(&self, operands: &[Operand<'_>]) -> FrameCutResult<Vec<Vec<f32>>>;
}

/// A per-clip transformation applied to the clip's own picture before mixing.
pub trait Effect: Send + Sync {
    fn type_name(&self) -> &str;

    fn from_plugin(&self) -> &str;

    /// Consume `source` and produce the effected picture. Kernels are looked
    /// up through `registry`.
    fn render(&self, source: Picture, registry: &PluginRegistry) -> FrameCutResult<Picture>;
}

/// A cross-clip blend of a foreground picture over the accumulated background.
pub trait Mixture: Send + Sync {
    fn type_name(&self) -> &str;

    fn from_plugin(&self) -> &str;

    fn mix(
        &self,
        background: Picture,
        foreground: Picture,
        registry: &PluginRegistry,
    ) -> FrameCutResult<Picture>;
}
