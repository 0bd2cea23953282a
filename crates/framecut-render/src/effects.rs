//! Built-in per-clip effects.
//!
//! Each effect is configured from its descriptor's argument bag when the
//! clip is constructed, so a bad argument fails the clip update rather than
//! a later render.

use framecut_core::accelerator::kernel;
use framecut_core::{
    BitDepth, Channel, EffectDescriptor, Effect, FrameCutError, FrameCutResult, Operand, Picture,
    PluginRegistry,
};

/// Key out every pixel within `tolerance` of `target` on all three channels.
/// Works at 16 bits; keyed pixels get alpha 0 and black RGB.
pub(crate) fn chroma_key(
    source: Picture,
    target: [f32; 3],
    tolerance: f32,
    registry: &PluginRegistry,
) -> FrameCutResult<Picture> {
    let mut picture = source.to_depth(BitDepth::Sixteen);
    let computer = registry.create_computer(kernel::REMOVE_COLOR)?;
    let r = picture.plane_f32(Channel::R);
    let g = picture.plane_f32(Channel::G);
    let b = picture.plane_f32(Channel::B);
    let alpha = picture.alpha_or_opaque().into_owned();
    let max = picture.depth.max_value() as f32;

    let mut out = computer.compute(&[
        Operand::Plane(&r),
        Operand::Plane(&g),
        Operand::Plane(&b),
        Operand::Plane(&alpha),
        Operand::Scalar(target[0]),
        Operand::Scalar(target[1]),
        Operand::Scalar(target[2]),
        Operand::Scalar(tolerance),
        Operand::Scalar(max),
    ])?;
    if out.len() != 1 || out[0].len() != picture.pixel_count() {
        return Err(FrameCutError::Device(format!(
            "{} returned {} planes",
            kernel::REMOVE_COLOR,
            out.len()
        )));
    }
    let keyed = out.remove(0);
    for (i, &a) in keyed.iter().enumerate() {
        if a <= 0.0 {
            picture.r[i] = 0;
            picture.g[i] = 0;
            picture.b[i] = 0;
        }
    }
    picture.a = if keyed.iter().all(|&a| a >= 1.0) {
        None
    } else {
        Some(keyed)
    };
    Ok(picture)
}

fn dimension(descriptor: &EffectDescriptor, key: &str) -> FrameCutResult<u32> {
    let value = descriptor.require_number(key)?;
    if !(value >= 0.0 && value <= u32::MAX as f64) {
        return Err(FrameCutError::invalid(format!(
            "{} argument `{key}` must be a non-negative integer, got {value}",
            descriptor.type_name
        )));
    }
    Ok(value as u32)
}

// ── RemoveColor ─────────────────────────────────────────────────────

/// Chroma key. Arguments `R`, `G`, `B` (16-bit channel values) and `Tolerance`.
pub struct RemoveColorEffect {
    from_plugin: String,
    target: [f32; 3],
    tolerance: f32,
}

impl RemoveColorEffect {
    pub fn from_descriptor(descriptor: &EffectDescriptor) -> FrameCutResult<Self> {
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

impl Effect for RemoveColorEffect {
    fn type_name(&self) -> &str {
        "RemoveColor"
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn render(&self, source: Picture, registry: &PluginRegistry) -> FrameCutResult<Picture> {
        chroma_key(source, self.target, self.tolerance, registry)
    }
}

// ── ReplaceAlpha ────────────────────────────────────────────────────

/// Overwrite the whole alpha plane with one value (`Alpha`, 0.0 to 1.0).
pub struct ReplaceAlphaEffect {
    from_plugin: String,
    alpha: f32,
}

impl ReplaceAlphaEffect {
    pub fn from_descriptor(descriptor: &EffectDescriptor) -> FrameCutResult<Self> {
        Ok(Self {
            from_plugin: descriptor.from_plugin.clone(),
            alpha: descriptor.require_number("Alpha")?.clamp(0.0, 1.0) as f32,
        })
    }
}

impl Effect for ReplaceAlphaEffect {
    fn type_name(&self) -> &str {
        "ReplaceAlpha"
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn render(&self, mut source: Picture, _registry: &PluginRegistry) -> FrameCutResult<Picture> {
        source.a = if self.alpha >= 1.0 {
            None
        } else {
            Some(vec![self.alpha; source.pixel_count()])
        };
        Ok(source)
    }
}

// ── Resize ──────────────────────────────────────────────────────────

pub struct ResizeEffect {
    from_plugin: String,
    width: u32,
    height: u32,
}

impl ResizeEffect {
    pub fn from_descriptor(descriptor: &EffectDescriptor) -> FrameCutResult<Self> {
        let width = dimension(descriptor, "Width")?;
        let height = dimension(descriptor, "Height")?;
        if width == 0 || height == 0 {
            return Err(FrameCutError::invalid("Resize needs a positive Width and Height"));
        }
        Ok(Self {
            from_plugin: descriptor.from_plugin.clone(),
            width,
            height,
        })
    }
}

impl Effect for ResizeEffect {
    fn type_name(&self) -> &str {
        "Resize"
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn render(&self, source: Picture, _registry: &PluginRegistry) -> FrameCutResult<Picture> {
        Ok(source.resize(self.width, self.height))
    }
}

// ── Crop ────────────────────────────────────────────────────────────

/// Keep the rectangle `X`, `Y`, `Width`, `Height`, clipped to the picture.
pub struct CropEffect {
    from_plugin: String,
    rect: [u32; 4],
}

impl CropEffect {
    pub fn from_descriptor(descriptor: &EffectDescriptor) -> FrameCutResult<Self> {
        Ok(Self {
            from_plugin: descriptor.from_plugin.clone(),
            rect: [
                dimension(descriptor, "X")?,
                dimension(descriptor, "Y")?,
                dimension(descriptor, "Width")?,
                dimension(descriptor, "Height")?,
            ],
        })
    }
}

impl Effect for CropEffect {
    fn type_name(&self) -> &str {
        "Crop"
    }

    fn from_plugin(&self) -> &str {
        &self.from_plugin
    }

    fn render(&self, source: Picture, _registry: &PluginRegistry) -> FrameCutResult<Picture> {
        let [x, y, w, h] = self.rect;
        let cropped = source.crop(x, y, w, h);
        if cropped.pixel_count() == 0 {
            return Err(FrameCutError::invalid(format!(
                "crop {x},{y} {w}x{h} is outside a {}x{} picture",
                source.width, source.height
            )));
        }
        Ok(cropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_registry;
    use framecut_core::plugin::INTERNAL_PLUGIN_ID;
    use framecut_core::Color;

    fn descriptor(type_name: &str) -> EffectDescriptor {
        EffectDescriptor::new(INTERNAL_PLUGIN_ID, type_name)
    }

    #[test]
    fn test_remove_color_keys_and_blackens() {
        let registry = test_registry();
        let mut pic = Picture::solid(2, 1, &Color::GREEN);
        pic.set_pixel(1, 0, [65535, 0, 0], 1.0);
        let effect = RemoveColorEffect::from_descriptor(
            &descriptor("RemoveColor")
                .with_arg("R", 0)
                .with_arg("G", 65535)
                .with_arg("B", 0)
                .with_arg("Tolerance", 100),
        )
        .unwrap();
        let out = effect.render(pic, &registry).unwrap();
        assert_eq!(out.get_pixel(0, 0), Some(([0, 0, 0], 0.0)));
        assert_eq!(out.get_pixel(1, 0), Some(([65535, 0, 0], 1.0)));
    }

    #[test]
    fn test_remove_color_is_idempotent() {
        let registry = test_registry();
        let mut pic = Picture::new(3, 1, BitDepth::Sixteen);
        pic.set_pixel(0, 0, [1000, 1000, 1000], 0.7);
        pic.set_pixel(1, 0, [5000, 1000, 1000], 1.0);
        let effect = RemoveColorEffect::from_descriptor(
            &descriptor("RemoveColor")
                .with_arg("R", 1000)
                .with_arg("G", 1000)
                .with_arg("B", 1000)
                .with_arg("Tolerance", 50),
        )
        .unwrap();
        let once = effect.render(pic, &registry).unwrap();
        let twice = effect.render(once.clone(), &registry).unwrap();
        assert_eq!(once.a, twice.a);
    }

    #[test]
    fn test_remove_color_needs_target() {
        assert!(RemoveColorEffect::from_descriptor(&descriptor("RemoveColor")).is_err());
    }

    #[test]
    fn test_replace_alpha() {
        let registry = test_registry();
        let effect =
            ReplaceAlphaEffect::from_descriptor(&descriptor("ReplaceAlpha").with_arg("Alpha", "0.5"))
                .unwrap();
        let out = effect.render(Picture::solid(2, 2, &Color::RED), &registry).unwrap();
        assert_eq!(out.get_pixel(1, 1), Some(([65535, 0, 0], 0.5)));

        let opaque =
            ReplaceAlphaEffect::from_descriptor(&descriptor("ReplaceAlpha").with_arg("Alpha", 3.0))
                .unwrap();
        let out = opaque.render(out, &registry).unwrap();
        assert!(out.a.is_none());
    }

    #[test]
    fn test_resize_and_crop() {
        let registry = test_registry();
        let resize = ResizeEffect::from_descriptor(
            &descriptor("Resize").with_arg("Width", 8).with_arg("Height", 4),
        )
        .unwrap();
        let crop = CropEffect::from_descriptor(
            &descriptor("Crop")
                .with_arg("X", 6)
                .with_arg("Y", 0)
                .with_arg("Width", 10)
                .with_arg("Height", 2),
        )
        .unwrap();
        let out = resize.render(Picture::solid(2, 2, &Color::BLUE), &registry).unwrap();
        assert_eq!((out.width, out.height), (8, 4));
        let out = crop.render(out, &registry).unwrap();
        assert_eq!((out.width, out.height), (2, 2));

        let outside = CropEffect::from_descriptor(
            &descriptor("Crop")
                .with_arg("X", 50)
                .with_arg("Y", 50)
                .with_arg("Width", 1)
                .with_arg("Height", 1),
        )
        .unwrap();
        assert!(outside.render(Picture::solid(2, 2, &Color::BLUE), &registry).is_err());
    }

    #[test]
    fn test_resize_rejects_zero_and_negative() {
        assert!(ResizeEffect::from_descriptor(
            &descriptor("Resize").with_arg("Width", 0).with_arg("Height", 4)
        )
        .is_err());
        assert!(CropEffect::from_descriptor(
            &descriptor("Crop")
                .with_arg("X", -1)
                .with_arg("Y", 0)
                .with_arg("Width", 1)
                .with_arg("Height", 1)
        )
        .is_err());
    }
}
