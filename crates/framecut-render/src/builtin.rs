//! The plugin that ships with the backend.

use std::sync::Arc;

use framecut_core::accelerator::kernel;
use framecut_core::plugin::{VideoSourceFactory, CURRENT_API_VERSION, INTERNAL_PLUGIN_ID};
use framecut_core::{
    Accelerator, Clip, ClipKind, Computer, Effect, FrameCutResult, Mixture, Plugin, PluginEntries,
    PluginManifest, VideoSource,
};

use crate::clips::{PhotoClip, SolidColorClip, TextClip, VideoClip};
use crate::computers::KernelComputer;
use crate::effects::{CropEffect, RemoveColorEffect, ReplaceAlphaEffect, ResizeEffect};
use crate::mixtures::{KernelMixture, RemoveColorMixture};
use crate::text::TextRasterizer;
use crate::video_decoder::FfmpegVideoSource;

/// Built-in clips, effects, mixtures and kernels, with every kernel bound
/// to one accelerator.
pub struct InternalPlugin {
    accelerator: Arc<dyn Accelerator>,
    rasterizer: Arc<TextRasterizer>,
}

impl InternalPlugin {
    pub fn new(accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            accelerator,
            rasterizer: Arc::new(TextRasterizer::new()),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<TextRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }
}

fn boxed<C: Clip + 'static>(clip: FrameCutResult<C>) -> FrameCutResult<Box<dyn Clip>> {
    clip.map(|c| Box::new(c) as Box<dyn Clip>)
}

fn effect<E: Effect + 'static>(effect: FrameCutResult<E>) -> FrameCutResult<Box<dyn Effect>> {
    effect.map(|e| Box::new(e) as Box<dyn Effect>)
}

fn mixture<M: Mixture + 'static>(mixture: FrameCutResult<M>) -> FrameCutResult<Box<dyn Mixture>> {
    mixture.map(|m| Box::new(m) as Box<dyn Mixture>)
}

impl Plugin for InternalPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            id: INTERNAL_PLUGIN_ID.to_string(),
            name: "FrameCut Internal".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            author: "FrameCut Team".to_string(),
            description: "Built-in clips, effects, mixtures and compute kernels".to_string(),
            author_url: None,
            publishing_url: None,
            api_version: CURRENT_API_VERSION,
        }
    }

    fn entries(&self) -> PluginEntries {
        let text_clip = Arc::clone(&self.rasterizer);
        let text_provider = Arc::clone(&self.rasterizer);

        let mut entries = PluginEntries::default()
            .with_clip(ClipKind::Video, |record, registry| {
                boxed(VideoClip::from_record(record, registry))
            })
            .with_clip(ClipKind::Photo, |record, registry| {
                boxed(PhotoClip::from_record(record, registry))
            })
            .with_clip(ClipKind::SolidColor, |record, registry| {
                boxed(SolidColorClip::from_record(record, registry))
            })
            .with_clip(ClipKind::Text, move |record, registry| {
                boxed(TextClip::from_record(record, registry, Arc::clone(&text_clip)))
            })
            .with_clip_provider(ClipKind::SolidColor, |id, name, registry| {
                boxed(SolidColorClip::create_new(id, name, registry))
            })
            .with_clip_provider(ClipKind::Text, move |id, name, registry| {
                boxed(TextClip::create_new(id, name, registry, Arc::clone(&text_provider)))
            })
            .with_effect("RemoveColor", |d| effect(RemoveColorEffect::from_descriptor(d)))
            .with_effect("ReplaceAlpha", |d| effect(ReplaceAlphaEffect::from_descriptor(d)))
            .with_effect("Resize", |d| effect(ResizeEffect::from_descriptor(d)))
            .with_effect("Crop", |d| effect(CropEffect::from_descriptor(d)))
            .with_mixture(kernel::OVERLAY, |d| mixture(KernelMixture::overlay(d)))
            .with_mixture(kernel::ADD, |d| mixture(KernelMixture::add(d)))
            .with_mixture(kernel::MINUS, |d| mixture(KernelMixture::minus(d)))
            .with_mixture(kernel::MULTIPLY, |d| mixture(KernelMixture::multiply(d)))
            .with_mixture(kernel::REMOVE_COLOR, |d| {
                mixture(RemoveColorMixture::from_descriptor(d))
            })
            .with_video_source(VideoSourceFactory::new(
                "ffmpeg",
                &["mp4", "mov", "mkv", "webm", "avi", "m4v"],
                || Box::new(FfmpegVideoSource::new()) as Box<dyn VideoSource>,
            ))
            .with_setting("accelerator", self.accelerator.name())
            .with_setting("execution_mode", format!("{:?}", self.accelerator.execution_mode()));

        for name in kernel::ALL {
            let accelerator = Arc::clone(&self.accelerator);
            entries = entries.with_computer(name, move || {
                Ok(Arc::new(KernelComputer::new(name, Arc::clone(&accelerator))) as Arc<dyn Computer>)
            });
        }
        entries
    }
}

/// A sealed registry holding only the internal plugin on the CPU accelerator.
#[cfg(test)]
pub(crate) fn test_registry() -> framecut_core::PluginRegistry {
    let mut registry = framecut_core::PluginRegistry::new();
    registry
        .init(vec![Box::new(InternalPlugin::new(Arc::new(
            crate::accel::CpuAccelerator::default(),
        )))])
        .unwrap();
    registry
}
