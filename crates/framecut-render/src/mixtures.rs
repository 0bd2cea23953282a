//! Built-in mixtures: blend a clip's picture over the accumulated background.

use framecut_core::accelerator::kernel;
use framecut_core::{
    BitDepth, Channel, FrameCutError, FrameCutResult, Mixture, MixtureDescriptor, Operand, Picture,
    PluginRegistry,
};

use crate::effects::chroma_key;

/// A mixture that runs one blend kernel per color channel.
///
/// Both pictures are brought to 16 bits and the foreground is scaled to
/// the background's size before the kernel runs.
pub struct KernelMixture {
    from_plugin: String,
    kernel: &'static str,
}

impl KernelMixture {
    pub fn new(from_plugin: impl Into<String>, kernel: &'static str) -> Self {
        Self {
            from_plugin: from_plugin.into(),
            kernel,
        }
    }

    pub fn overlay(descriptor: &MixtureDescriptor) -> FrameCutResult<Self> {
        Ok(Self::new(descriptor.from_plugin.clone(), kernel::OVERLAY))
    }

    pub fn add(descriptor: &MixtureDescriptor) -> FrameCutResult<Self> {
        Ok(Self::new(descriptor.from_plugin.clone(), kernel::ADD))
    }

    pub fn minus(descriptor: &MixtureDescriptor) -> FrameCutResult<Self> {
        Ok(Self::new(descriptor.from_plugin.clone(), kernel::MINUS))
    }

    pub fn multiply(descriptor: &MixtureDescriptor) -> FrameCutResult<Self> {
        Ok(Self::new(descriptor.from_plugin.clone(), kernel::MULTIPLY))
    }
}

impl Mixture for KernelMixture {
    fn type_name(&self) -> &str {
        self.kernel
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn mix(
        &self,
        background: Picture,
        foreground: Picture,
        registry: &PluginRegistry,
    ) -> FrameCutResult<Picture> {
        blend(self.kernel, background, foreground, registry)
    }
}

/// Run blend kernel `name` over every channel of the two pictures.
pub(crate) fn blend(
    name: &str,
    background: Picture,
    foreground: Picture,
    registry: &PluginRegistry,
) -> FrameCutResult<Picture> {
    let mut bg = background.to_depth(BitDepth::Sixteen);
    let fg = foreground
        .to_depth(BitDepth::Sixteen)
        .resize(bg.width, bg.height);
    let computer = registry.create_computer(name)?;
    let max = bg.depth.max_value() as f32;
    let fg_a = fg.alpha_or_opaque().into_owned();
    let bg_a = bg.alpha_or_opaque().into_owned();

    let mut alpha = None;
    for channel in [Channel::R, Channel::G, Channel::B] {
        let fg_plane = fg.plane_f32(channel);
        let bg_plane = bg.plane_f32(channel);
        let mut out = computer.compute(&[
            Operand::Plane(&fg_plane),
            Operand::Plane(&bg_plane),
            Operand::Plane(&fg_a),
            Operand::Plane(&bg_a),
            Operand::Scalar(max),
        ])?;
        if out.len() != 2 {
            return Err(FrameCutError::Device(format!(
                "{name} returned {} planes, expected 2",
                out.len()
            )));
        }
        let out_a = out.pop().unwrap_or_default();
        bg.set_plane_f32(channel, &out[0])?;
        alpha = Some(out_a);
    }

    bg.a = match alpha {
        Some(a) if a.len() == bg.pixel_count() && a.iter().any(|&v| v < 1.0) => Some(a),
        _ => None,
    };
    Ok(bg)
}

/// Chroma-keys the foreground with `MixtureArgs` `R`, `G`, `B` and
/// `Tolerance`, then overlays what is left.
pub struct RemoveColorMixture {
    from_plugin: String,
    target: [f32; 3],
    tolerance: f32,
}

impl RemoveColorMixture {
    pub fn from_descriptor(descriptor: &MixtureDescriptor) -> FrameCutResult<Self> {
        Ok(Self {
            from_plugin: descriptor.from_plugin.clone(),
            target: [
                descriptor.require_number("R")? as f32,
                descriptor.require_number("G")? as f32,
                descriptor.require_number("B")? as f32,
            ],
            tolerance: descriptor.number("Tolerance").unwrap_or(0.0).max(0.0) as f32,
        })
    }
}

impl Mixture for RemoveColorMixture {
    fn type_name(&self) -> &str {
        kernel::REMOVE_COLOR
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn mix(
        &self,
        background: Picture,
        foreground: Picture,
        registry: &PluginRegistry,
    ) -> FrameCutResult<Picture> {
        let keyed = chroma_key(foreground, self.target, self.tolerance, registry)?;
        blend(kernel::OVERLAY, background, keyed, registry)
    }
}
