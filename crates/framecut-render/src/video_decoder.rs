//! Video decoding via FFmpeg subprocesses.
//! `ffprobe` reads stream metadata once; each frame is extracted with a
//! single-frame `ffmpeg` seek that writes raw RGBA to stdout.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use framecut_core::{FrameCutError, FrameCutResult, Picture, VideoSource};

/// Decoded frames kept per source.
const MAX_CACHED_FRAMES: usize = 64;

/// Least-recently-used cache of decoded frames, keyed by source index.
#[derive(Debug)]
struct FrameCache {
    capacity: usize,
    frames: HashMap<u64, Picture>,
    order: VecDeque<u64>,
}

impl FrameCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, index: u64) -> Option<&Picture> {
        if self.frames.contains_key(&index) {
            self.touch(index);
        }
        self.frames.get(&index)
    }

    fn insert(&mut self, index: u64, picture: Picture) {
        if self.frames.insert(index, picture).is_some() {
            self.touch(index);
            return;
        }
        self.order.push_back(index);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.frames.remove(&oldest);
            }
        }
    }

    fn touch(&mut self, index: u64) {
        if let Some(pos) = self.order.iter().position(|&i| i == index) {
            self.order.remove(pos);
        }
        self.order.push_back(index);
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.order.clear();
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(MAX_CACHED_FRAMES)
    }
}

/// Metadata about a video file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: f64,
    pub frame_count: u64,
}

/// A [`VideoSource`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Default)]
pub struct FfmpegVideoSource {
    path: Option<PathBuf>,
    info: Option<VideoInfo>,
    frame_cache: FrameCache,
}

impl FfmpegVideoSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if FFmpeg is available on the system.
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn info(&self) -> Option<&VideoInfo> {
        self.info.as_ref()
    }

    pub fn cache_size(&self) -> usize {
        self.frame_cache.len()
    }

    fn opened(&self) -> FrameCutResult<(&Path, &VideoInfo)> {
        match (&self.path, &self.info) {
            (Some(path), Some(info)) => Ok((path.as_path(), info)),
            _ => Err(FrameCutError::resource_unbound(
                "video source used before initialize",
            )),
        }
    }
}

/// Probe a video file for its first video stream's metadata.
pub fn probe(path: &Path) -> FrameCutResult<VideoInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| FrameCutError::resource(format!("failed to run ffprobe: {}", e), path))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FrameCutError::resource(format!("ffprobe failed: {}", stderr.trim()), path));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    parse_probe_output(&json).map_err(|message| FrameCutError::resource(message, path))
}

fn parse_probe_output(json: &serde_json::Value) -> Result<VideoInfo, String> {
    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| "no streams found in video".to_string())?;
    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| "no video stream found".to_string())?;

    let dimension = |key: &str| {
        video_stream[key]
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("missing {} in video stream", key))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;
    let fps = parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or("30/1"));

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream["duration"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let frame_count = video_stream["nb_frames"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or_else(|| (duration_secs * fps).round().max(0.0) as u64);

    Ok(VideoInfo {
        width,
        height,
        duration_secs,
        fps,
        frame_count,
    })
}

impl VideoSource for FfmpegVideoSource {
    fn initialize(&mut self, path: &Path) -> FrameCutResult<()> {
        let info = probe(path)?;
        tracing::debug!(
            "Opened video {} ({}x{} @ {:.3} fps, {} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
        self.path = Some(path.to_path_buf());
        self.info = Some(info);
        self.frame_cache.clear();
        Ok(())
    }

    fn total_frames(&self) -> u64 {
        self.info.as_ref().map_or(0, |i| i.frame_count)
    }

    fn fps(&self) -> f64 {
        self.info.as_ref().map_or(0.0, |i| i.fps)
    }

    fn width(&self) -> u32 {
        self.info.as_ref().map_or(0, |i| i.width)
    }

    fn height(&self) -> u32 {
        self.info.as_ref().map_or(0, |i| i.height)
    }

    fn frame(&mut self, index: u64) -> FrameCutResult<Picture> {
        if let Some(cached) = self.frame_cache.get(index) {
            return Ok(cached.clone());
        }
        let (path, info) = self.opened()?;
        let last = info.frame_count.saturating_sub(1);
        let timestamp_secs = index.min(last) as f64 / info.fps.max(1e-6);
        let ts_str = format!("{:.3}", timestamp_secs);

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &ts_str, "-i"])
            .arg(path)
            .args(["-vframes", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| FrameCutError::resource(format!("failed to run ffmpeg: {}", e), path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameCutError::resource(
                format!("ffmpeg could not decode frame {}: {}", index, stderr.trim()),
                path,
            ));
        }

        let expected_size = (info.width as usize) * (info.height as usize) * 4;
        if output.stdout.len() < expected_size {
            return Err(FrameCutError::resource(
                format!(
                    "ffmpeg returned {} bytes for frame {}, expected {}",
                    output.stdout.len(),
                    index,
                    expected_size
                ),
                path,
            ));
        }

        let picture = Picture::from_rgba8(info.width, info.height, &output.stdout[..expected_size])?;
        self.frame_cache.insert(index, picture.clone());
        Ok(picture)
    }

    fn dispose(&mut self) {
        self.frame_cache.clear();
        self.path = None;
        self.info = None;
    }
}

/// Parse a frame rate string like "30/1" or "24000/1001" into a float.
fn parse_frame_rate(rate_str: &str) -> f64 {
    if let Some((num_str, den_str)) = rate_str.split_once('/') {
        let num: f64 = num_str.parse().unwrap_or(30.0);
        let den: f64 = den_str.parse().unwrap_or(1.0);
        if den > 0.0 {
            num / den
        } else {
            30.0
        }
    } else {
        rate_str.parse::<f64>().unwrap_or(30.0)
    }
}
