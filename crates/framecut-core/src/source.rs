//! Contracts for media decoders and sound tracks supplied by plugins.

use std::path::Path;

use serde_json::Value;

use crate::error::FrameCutResult;
use crate::picture::Picture;
use crate::plugin::PluginRegistry;

/// Frame-by-index access to a decoded video stream.
pub trait VideoSource: Send {
    /// Open `path`. A failure means this source cannot handle the file.
    fn initialize(&mut self, path: &Path) -> FrameCutResult<()>;

    fn total_frames(&self) -> u64;

    fn fps(&self) -> f64;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Decode frame `index` at native resolution.
    fn frame(&mut self, index: u64) -> FrameCutResult<Picture>;

    fn dispose(&mut self) {}
}

/// Sample access to a decoded audio stream.
pub trait AudioSource: Send {
    fn initialize(&mut self, path: &Path) -> FrameCutResult<()>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    fn total_samples(&self) -> u64;

    /// Read up to `count` interleaved samples starting at sample `start`.
    fn read_samples(&mut self, start: u64, count: usize) -> FrameCutResult<Vec<f32>>;

    fn dispose(&mut self) {}
}

/// An audio item placed on the timeline.
pub trait SoundTrack: Send + Sync {
    fn id(&self) -> &str;

    fn from_plugin(&self) -> &str;

    fn start_frame(&self) -> u32;

    fn duration(&self) -> u32;

    fn reinit(&mut self, registry: &PluginRegistry) -> FrameCutResult<()>;

    fn to_record(&self) -> FrameCutResult<Value>;

    fn dispose(&mut self) {}
}
