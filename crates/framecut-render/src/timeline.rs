//! Per-frame timeline composition.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use framecut_core::config::OutputSize;
use framecut_core::hash::FrameFingerprint;
use framecut_core::{Clip, Color, FrameCutError, FrameCutResult, Picture, PluginRegistry};

use crate::image_loader;

/// File stem used when no clip is active at the requested frame.
pub const NULL_FRAME: &str = "nullframe";

/// One clip's picture for one timeline frame.
pub struct OneFrame<'a> {
    pub frame_index: u32,
    pub clip: &'a dyn Clip,
    pub picture: Picture,
}

/// Clips active at `frame`, top layer first.
///
/// Two active clips on one layer is an authoring error and fails with
/// [`FrameCutError::OverlappingLayers`].
pub fn select_active_clips<'a>(
    clips: &'a [Box<dyn Clip>],
    frame: u32,
) -> FrameCutResult<Vec<&'a dyn Clip>> {
    let mut layers: BTreeMap<u32, Vec<&'a dyn Clip>> = BTreeMap::new();
    for clip in clips.iter().filter(|c| c.header().is_active_at(frame)) {
        layers
            .entry(clip.header().layer_index)
            .or_default()
            .push(clip.as_ref());
    }
    if let Some((&layer, conflict)) = layers.iter().find(|(_, on_layer)| on_layer.len() > 1) {
        return Err(FrameCutError::OverlappingLayers {
            layer,
            frame,
            clips: conflict.iter().map(|c| c.header().display_ref()).collect(),
        });
    }
    Ok(layers.into_values().rev().flatten().collect())
}

/// Fetch every selected clip's picture for `frame`, keeping the order.
pub fn collect_frames<'a>(
    active: &[&'a dyn Clip],
    frame: u32,
    width: u32,
    height: u32,
) -> FrameCutResult<Vec<OneFrame<'a>>> {
    active
        .iter()
        .map(|&clip| {
            Ok(OneFrame {
                frame_index: frame,
                clip,
                picture: clip.frame(frame, width, height)?,
            })
        })
        .collect()
}

/// Fold the frames into one picture.
///
/// `frames` is ordered top layer first. The fold starts from the bottom:
/// the lowest layer's picture is taken as is, and every layer above it has
/// its effect chain applied and is then mixed over the running result with
/// its own mixture. With no frames the result is `background`.
pub fn composite(
    frames: Vec<OneFrame<'_>>,
    registry: &PluginRegistry,
    width: u32,
    height: u32,
    background: &Color,
) -> FrameCutResult<Picture> {
    let mut result: Option<Picture> = None;
    for one in frames.into_iter().rev() {
        result = Some(match result {
            None => one.picture,
            Some(under) => {
                let behavior = one.clip.behavior();
                let mut picture = one.picture;
                for effect in &behavior.effects {
                    picture = effect.render(picture, registry)?;
                }
                behavior.mixture.mix(under, picture, registry)?
            }
        });
    }
    Ok(result.unwrap_or_else(|| Picture::solid(width, height, background)))
}

/// Renders timeline frames to PNG files in a working folder.
///
/// Files are reused only within one clip set: the fingerprint is salted
/// with a token that [`Compositor::begin_clip_set`] renews, so a new clip
/// set (or a new process) never picks up a file rendered from older
/// sources.
pub struct Compositor {
    registry: Arc<PluginRegistry>,
    output: OutputSize,
    background: Color,
    temp_folder: PathBuf,
    clip_set: String,
}

impl Compositor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        output: OutputSize,
        background: Color,
        temp_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            output,
            background,
            temp_folder: temp_folder.into(),
            clip_set: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Start a new clip set. Frames rendered before are not reused.
    pub fn begin_clip_set(&mut self) {
        self.clip_set = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!("Frame cache scoped to clip set {}", self.clip_set);
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn output(&self) -> OutputSize {
        self.output
    }

    pub fn temp_folder(&self) -> &Path {
        &self.temp_folder
    }

    /// Composite frame `frame` of `clips` in memory.
    pub fn render_frame(&self, clips: &[Box<dyn Clip>], frame: u32) -> FrameCutResult<Picture> {
        let OutputSize { width, height } = self.output;
        let active = select_active_clips(clips, frame)?;
        let frames = collect_frames(&active, frame, width, height)?;
        composite(frames, &self.registry, width, height, &self.background)
    }

    /// Render frame `frame` to `framecut_render_<fingerprint>.png` and return
    /// its path. An existing file with the same fingerprint is returned as is;
    /// the fingerprint covers the clip set token, the active records and the
    /// files they reference.
    pub fn render_to_file(&self, clips: &[Box<dyn Clip>], frame: u32) -> FrameCutResult<PathBuf> {
        let OutputSize { width, height } = self.output;
        let active = select_active_clips(clips, frame)?;

        if active.is_empty() {
            let path = self.output_path(NULL_FRAME);
            let picture = Picture::solid(width, height, &self.background);
            write_atomically(&picture, &path)?;
            return Ok(path);
        }

        let mut fingerprint = FrameFingerprint::new(frame, width, height).salt(&self.clip_set);
        for clip in &active {
            fingerprint = fingerprint.record(&clip.to_record()?);
        }
        let fingerprint = fingerprint.finish();
        let path = self.output_path(&fingerprint.to_hex());
        if path.exists() {
            tracing::debug!("Frame {} served from cache {}", frame, path.display());
            return Ok(path);
        }

        let frames = collect_frames(&active, frame, width, height)?;
        let picture = composite(frames, &self.registry, width, height, &self.background)?;
        write_atomically(&picture, &path)?;
        tracing::debug!("Rendered frame {} ({} clips) to {}", frame, active.len(), path.display());
        Ok(path)
    }

    fn output_path(&self, stem: &str) -> PathBuf {
        self.temp_folder.join(format!("framecut_render_{stem}.png"))
    }
}

/// Write through a temporary name so a cached path never holds a partial file.
fn write_atomically(picture: &Picture, path: &Path) -> FrameCutResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("png.partial");
    image_loader::save_png_rgb8(picture, &partial)?;
    std::fs::rename(&partial, path)?;
    Ok(())
}
