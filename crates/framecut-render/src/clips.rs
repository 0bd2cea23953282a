//! Built-in clip variants.
//!
//! Every clip keeps the record it was built from, so `to_record` hands back
//! exactly what the creator accepted (plus defaults filled in).

use std::path::Path;
use std::sync::Arc;

use fontdue::Font;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use framecut_core::plugin::INTERNAL_PLUGIN_ID;
use framecut_core::{
    BitDepth, Clip, ClipBehavior, ClipHeader, ClipKind, Color, FrameCutError, FrameCutResult,
    Picture, PluginRegistry, VideoSource,
};

use crate::image_loader;
use crate::text::TextRasterizer;

fn parse_record<R: serde::de::DeserializeOwned>(record: Value, kind: ClipKind) -> FrameCutResult<R> {
    serde_json::from_value(record)
        .map_err(|e| FrameCutError::invalid(format!("malformed {} record: {}", kind, e)))
}

fn file_path(header: &ClipHeader) -> FrameCutResult<&Path> {
    match header.file_path.as_deref() {
        Some(path) if !path.is_empty() => Ok(Path::new(path)),
        _ => Err(FrameCutError::invalid(format!(
            "{} `{}` has no FilePath",
            header.clip_type, header.id
        ))),
    }
}

fn not_ready(header: &ClipHeader) -> FrameCutError {
    match header.file_path.as_deref() {
        Some(path) => FrameCutError::resource(
            format!("clip `{}` is not initialized", header.id),
            path,
        ),
        None => FrameCutError::resource_unbound(format!("clip `{}` is not initialized", header.id)),
    }
}

// ── SolidColorClip ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SolidColorRecord {
    #[serde(flatten)]
    pub header: ClipHeader,
    #[serde(default)]
    pub r: u16,
    #[serde(default)]
    pub g: u16,
    #[serde(default)]
    pub b: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f32>,
}

/// A clip filled with one color.
#[derive(Debug)]
pub struct SolidColorClip {
    record: SolidColorRecord,
    behavior: ClipBehavior,
}

impl SolidColorClip {
    pub fn from_record(record: Value, registry: &PluginRegistry) -> FrameCutResult<Self> {
        let record: SolidColorRecord = parse_record(record, ClipKind::SolidColor)?;
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self { record, behavior })
    }

    /// A new opaque white clip.
    pub fn create_new(id: &str, name: &str, registry: &PluginRegistry) -> FrameCutResult<Self> {
        let record = SolidColorRecord {
            header: ClipHeader::new(id, name, INTERNAL_PLUGIN_ID, ClipKind::SolidColor),
            r: 65535,
            g: 65535,
            b: 65535,
            a: None,
        };
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self { record, behavior })
    }

    pub fn color(&self) -> Color {
        let r = &self.record;
        match r.a {
            Some(a) => Color::rgba16(r.r, r.g, r.b, a),
            None => Color::rgb16(r.r, r.g, r.b),
        }
    }
}

impl Clip for SolidColorClip {
    fn header(&self) -> &ClipHeader {
        &self.record.header
    }

    fn behavior(&self) -> &ClipBehavior {
        &self.behavior
    }

    fn reinit(&mut self, _registry: &PluginRegistry) -> FrameCutResult<()> {
        Ok(())
    }

    fn source_frame(&self, _index: u32, width: u32, height: u32) -> FrameCutResult<Picture> {
        Ok(Picture::solid(width, height, &self.color()))
    }

    fn to_record(&self) -> FrameCutResult<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }
}

// ── PhotoClip ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    #[serde(flatten)]
    pub header: ClipHeader,
}

/// A still image, decoded once on `reinit`.
#[derive(Debug)]
pub struct PhotoClip {
    record: PhotoRecord,
    behavior: ClipBehavior,
    picture: Option<Picture>,
}

impl PhotoClip {
    pub fn from_record(record: Value, registry: &PluginRegistry) -> FrameCutResult<Self> {
        let record: PhotoRecord = parse_record(record, ClipKind::Photo)?;
        file_path(&record.header)?;
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self {
            record,
            behavior,
            picture: None,
        })
    }
}

impl Clip for PhotoClip {
    fn header(&self) -> &ClipHeader {
        &self.record.header
    }

    fn behavior(&self) -> &ClipBehavior {
        &self.behavior
    }

    fn reinit(&mut self, _registry: &PluginRegistry) -> FrameCutResult<()> {
        self.picture = None;
        let path = file_path(&self.record.header)?;
        if !path.exists() {
            return Err(FrameCutError::FileNotFound(path.to_path_buf()));
        }
        self.picture = Some(image_loader::load_picture(path)?);
        Ok(())
    }

    fn source_frame(&self, _index: u32, width: u32, height: u32) -> FrameCutResult<Picture> {
        let picture = self
            .picture
            .as_ref()
            .ok_or_else(|| not_ready(&self.record.header))?;
        Ok(picture.clone().resize(width, height))
    }

    fn to_record(&self) -> FrameCutResult<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }

    fn dispose(&mut self) {
        self.picture = None;
    }
}

// ── VideoClip ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    #[serde(flatten)]
    pub header: ClipHeader,
}

/// A clip backed by a [`VideoSource`] acquired through the registry.
pub struct VideoClip {
    record: VideoRecord,
    behavior: ClipBehavior,
    source: Mutex<Option<Box<dyn VideoSource>>>,
}

impl VideoClip {
    pub fn from_record(record: Value, registry: &PluginRegistry) -> FrameCutResult<Self> {
        let record: VideoRecord = parse_record(record, ClipKind::Video)?;
        file_path(&record.header)?;
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self {
            record,
            behavior,
            source: Mutex::new(None),
        })
    }

    /// Map a clip-relative frame onto the source's own frame numbering.
    /// With a `FrameTime` the index is converted through seconds at the
    /// source frame rate.
    fn source_index(&self, index: u32, fps: f64) -> u64 {
        let frame_time = self.record.header.frame_time as f64;
        if frame_time > 0.0 && fps > 0.0 {
            (index as f64 * frame_time * fps).round() as u64
        } else {
            index as u64
        }
    }
}

impl Clip for VideoClip {
    fn header(&self) -> &ClipHeader {
        &self.record.header
    }

    fn behavior(&self) -> &ClipBehavior {
        &self.behavior
    }

    fn reinit(&mut self, registry: &PluginRegistry) -> FrameCutResult<()> {
        self.dispose();
        let path = file_path(&self.record.header)?;
        let source = registry.create_video_source(path)?;
        *self.source.get_mut() = Some(source);
        Ok(())
    }

    fn source_frame(&self, index: u32, width: u32, height: u32) -> FrameCutResult<Picture> {
        let mut guard = self.source.lock();
        let source = guard
            .as_mut()
            .ok_or_else(|| not_ready(&self.record.header))?;
        let source_index = self.source_index(index, source.fps());
        Ok(source.frame(source_index)?.resize(width, height))
    }

    fn to_record(&self) -> FrameCutResult<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }

    fn clip_length(&self) -> Option<u32> {
        let guard = self.source.lock();
        match guard.as_ref() {
            Some(source) => u32::try_from(source.total_frames()).ok(),
            None => Some(self.record.header.duration),
        }
    }

    fn dispose(&mut self) {
        if let Some(mut source) = self.source.get_mut().take() {
            source.dispose();
        }
    }
}

// ── TextClip ────────────────────────────────────────────────────────

fn default_font_size() -> f32 {
    48.0
}

/// One positioned run of text. Coordinates are output pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextEntry {
    pub text: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_file: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default)]
    pub r: u16,
    #[serde(default)]
    pub g: u16,
    #[serde(default)]
    pub b: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f32>,
}

impl TextEntry {
    fn color(&self) -> Color {
        match self.a {
            Some(a) => Color::rgba16(self.r, self.g, self.b, a),
            None => Color::rgb16(self.r, self.g, self.b),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextRecord {
    #[serde(flatten)]
    pub header: ClipHeader,
    #[serde(default)]
    pub text_entries: Vec<TextEntry>,
}

/// Text drawn onto a transparent canvas the size of the output frame.
pub struct TextClip {
    record: TextRecord,
    behavior: ClipBehavior,
    rasterizer: Arc<TextRasterizer>,
    fonts: Option<Vec<Arc<Font>>>,
}

impl TextClip {
    pub fn from_record(
        record: Value,
        registry: &PluginRegistry,
        rasterizer: Arc<TextRasterizer>,
    ) -> FrameCutResult<Self> {
        let record: TextRecord = parse_record(record, ClipKind::Text)?;
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self {
            record,
            behavior,
            rasterizer,
            fonts: None,
        })
    }

    /// A new clip with one white placeholder entry.
    pub fn create_new(
        id: &str,
        name: &str,
        registry: &PluginRegistry,
        rasterizer: Arc<TextRasterizer>,
    ) -> FrameCutResult<Self> {
        let record = TextRecord {
            header: ClipHeader::new(id, name, INTERNAL_PLUGIN_ID, ClipKind::Text),
            text_entries: vec![TextEntry {
                text: "Text".to_string(),
                x: 0,
                y: 0,
                font_family: None,
                font_file: None,
                font_size: default_font_size(),
                r: 65535,
                g: 65535,
                b: 65535,
                a: None,
            }],
        };
        let behavior = ClipBehavior::resolve(&record.header, registry)?;
        Ok(Self {
            record,
            behavior,
            rasterizer,
            fonts: None,
        })
    }

    pub fn entries(&self) -> &[TextEntry] {
        &self.record.text_entries
    }
}

impl Clip for TextClip {
    fn header(&self) -> &ClipHeader {
        &self.record.header
    }

    fn behavior(&self) -> &ClipBehavior {
        &self.behavior
    }

    fn reinit(&mut self, _registry: &PluginRegistry) -> FrameCutResult<()> {
        self.fonts = None;
        let fonts = self
            .record
            .text_entries
            .iter()
            .map(|e| {
                self.rasterizer
                    .resolve(e.font_family.as_deref(), e.font_file.as_deref())
            })
            .collect::<FrameCutResult<Vec<_>>>()?;
        self.fonts = Some(fonts);
        Ok(())
    }

    fn source_frame(&self, _index: u32, width: u32, height: u32) -> FrameCutResult<Picture> {
        let fonts = self
            .fonts
            .as_ref()
            .ok_or_else(|| not_ready(&self.record.header))?;
        let mut canvas = Picture::new(width, height, BitDepth::Sixteen);
        *canvas.alpha_mut() = vec![0.0; canvas.pixel_count()];
        for (entry, font) in self.record.text_entries.iter().zip(fonts) {
            self.rasterizer.draw(
                &mut canvas,
                font,
                &entry.text,
                entry.x,
                entry.y,
                entry.font_size,
                &entry.color(),
            );
        }
        Ok(canvas)
    }

    fn to_record(&self) -> FrameCutResult<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }

    fn dispose(&mut self) {
        self.fonts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_registry;
    use serde_json::json;

    fn solid_record() -> Value {
        json!({
            "Id": "s1",
            "Name": "red",
            "FromPlugin": INTERNAL_PLUGIN_ID,
            "ClipType": 2,
            "LayerIndex": 0,
            "StartFrame": 0,
            "Duration": 100,
            "R": 65535,
            "G": 0,
            "B": 0
        })
    }

    #[test]
    fn test_solid_color_frame() {
        let registry = test_registry();
        let mut clip = SolidColorClip::from_record(solid_record(), &registry).unwrap();
        clip.reinit(&registry).unwrap();
        let pic = clip.frame(50, 4, 3).unwrap();
        assert_eq!(pic, Picture::solid(4, 3, &Color::RED));
        assert!(clip.frame(101, 4, 3).is_err());
    }

    #[test]
    fn test_solid_color_record_round_trip() {
        let registry = test_registry();
        let clip = SolidColorClip::from_record(solid_record(), &registry).unwrap();
        let record = clip.to_record().unwrap();
        assert_eq!(record["R"], json!(65535));
        assert_eq!(record["Duration"], json!(100));
        assert_eq!(record["ClipType"], json!(2));
        let again = SolidColorClip::from_record(record, &registry).unwrap();
        assert_eq!(again.header(), clip.header());
        assert_eq!(again.color(), clip.color());
    }

    #[test]
    fn test_unknown_effect_fails_construction() {
        let registry = test_registry();
        let mut record = solid_record();
        record["Effects"] = json!([{ "Type": "Sharpen" }]);
        assert!(matches!(
            SolidColorClip::from_record(record, &registry),
            Err(FrameCutError::UnsupportedEffectType { .. })
        ));
    }

    #[test]
    fn test_photo_requires_reinit() {
        let registry = test_registry();
        let clip = PhotoClip::from_record(
            json!({
                "Id": "p1",
                "FromPlugin": INTERNAL_PLUGIN_ID,
                "ClipType": 1,
                "Duration": 10,
                "FilePath": "/nonexistent/photo.png"
            }),
            &registry,
        )
        .unwrap();
        assert!(matches!(clip.frame(0, 2, 2), Err(FrameCutError::Resource { .. })));
        let mut clip = clip;
        assert!(matches!(
            clip.reinit(&registry),
            Err(FrameCutError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_photo_needs_path() {
        let registry = test_registry();
        let result = PhotoClip::from_record(
            json!({ "Id": "p2", "FromPlugin": INTERNAL_PLUGIN_ID, "ClipType": 1 }),
            &registry,
        );
        assert!(matches!(result, Err(FrameCutError::InvalidArgument(_))));
    }

    #[test]
    fn test_photo_loads_and_scales() {
        let registry = test_registry();
        let path = std::env::temp_dir().join(format!("framecut_photo_{}.png", uuid::Uuid::new_v4()));
        image_loader::save_png_rgb8(&Picture::solid(2, 2, &Color::BLUE), &path).unwrap();
        let mut clip = PhotoClip::from_record(
            json!({
                "Id": "p3",
                "FromPlugin": INTERNAL_PLUGIN_ID,
                "ClipType": 1,
                "Duration": 5,
                "FilePath": path.to_string_lossy()
            }),
            &registry,
        )
        .unwrap();
        clip.reinit(&registry).unwrap();
        std::fs::remove_file(&path).ok();
        let pic = clip.frame(5, 6, 4).unwrap();
        assert_eq!((pic.width, pic.height), (6, 4));
        assert_eq!(pic.get_pixel(5, 3), Some(([0, 0, 255], 1.0)));
    }

    #[test]
    fn test_video_without_source_is_resource_error() {
        let registry = test_registry();
        let mut clip = VideoClip::from_record(
            json!({
                "Id": "v1",
                "FromPlugin": INTERNAL_PLUGIN_ID,
                "ClipType": 0,
                "Duration": 10,
                "FilePath": "/nonexistent/movie.mp4"
            }),
            &registry,
        )
        .unwrap();
        assert!(matches!(clip.frame(0, 2, 2), Err(FrameCutError::Resource { .. })));
        assert!(matches!(
            clip.reinit(&registry),
            Err(FrameCutError::FileNotFound(_))
        ));
        assert_eq!(clip.clip_length(), Some(10));
    }

    #[test]
    fn test_text_record_defaults() {
        let registry = test_registry();
        let clip = TextClip::from_record(
            json!({
                "Id": "t1",
                "FromPlugin": INTERNAL_PLUGIN_ID,
                "ClipType": 3,
                "TextEntries": [{ "Text": "hello", "X": 10, "Y": 20, "R": 65535 }]
            }),
            &registry,
            Arc::new(TextRasterizer::new()),
        )
        .unwrap();
        assert_eq!(clip.entries()[0].font_size, 48.0);
        assert!(matches!(clip.frame(0, 8, 8), Err(FrameCutError::Resource { .. })));
        let record = clip.to_record().unwrap();
        assert_eq!(record["TextEntries"][0]["X"], json!(10));
    }
}
