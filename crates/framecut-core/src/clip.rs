//! Clip model: the placement header every clip carries, the effect/mixture
//! descriptors it references, and the [`Clip`] capability trait.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::effect::{Effect, Mixture};
use crate::error::{FrameCutError, FrameCutResult};
use crate::picture::Picture;
use crate::plugin::{PluginRegistry, INTERNAL_PLUGIN_ID};

// ── Discriminators ──────────────────────────────────────────────────

/// The `ClipType` discriminator carried by every serialized clip record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ClipKind {
    Video,
    Photo,
    SolidColor,
    Text,
    Audio,
    Special,
    Extend,
}

impl ClipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Video => "VideoClip",
            ClipKind::Photo => "PhotoClip",
            ClipKind::SolidColor => "SolidColorClip",
            ClipKind::Text => "TextClip",
            ClipKind::Audio => "AudioClip",
            ClipKind::Special => "Special",
            ClipKind::Extend => "ExtendClip",
        }
    }
}

impl TryFrom<u32> for ClipKind {
    type Error = FrameCutError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ClipKind::Video,
            1 => ClipKind::Photo,
            2 => ClipKind::SolidColor,
            3 => ClipKind::Text,
            4 => ClipKind::Audio,
            5 => ClipKind::Special,
            6 => ClipKind::Extend,
            other => return Err(FrameCutError::invalid(format!("unknown ClipType {other}"))),
        })
    }
}

impl From<ClipKind> for u32 {
    fn from(kind: ClipKind) -> u32 {
        match kind {
            ClipKind::Video => 0,
            ClipKind::Photo => 1,
            ClipKind::SolidColor => 2,
            ClipKind::Text => 3,
            ClipKind::Audio => 4,
            ClipKind::Special => 5,
            ClipKind::Extend => 6,
        }
    }
}

impl fmt::Display for ClipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a clip's picture is blended onto the layers beneath it.
///
/// Serialized as its integer value; names are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "MixtureModeRepr", into = "u32")]
pub enum MixtureMode {
    #[default]
    Overlay,
    Add,
    Minus,
    Multiply,
    RemoveColor,
}

impl MixtureMode {
    /// Type name of the built-in mixture implementing this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            MixtureMode::Overlay => "Overlay",
            MixtureMode::Add => "Add",
            MixtureMode::Minus => "Minus",
            MixtureMode::Multiply => "Multiply",
            MixtureMode::RemoveColor => "RemoveColor",
        }
    }
}

impl FromStr for MixtureMode {
    type Err = FrameCutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            MixtureMode::Overlay,
            MixtureMode::Add,
            MixtureMode::Minus,
            MixtureMode::Multiply,
            MixtureMode::RemoveColor,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| FrameCutError::invalid(format!("unknown mixture mode `{s}`")))
    }
}

impl From<MixtureMode> for u32 {
    fn from(mode: MixtureMode) -> u32 {
        mode as u32
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MixtureModeRepr {
    Index(u32),
    Name(String),
}

impl TryFrom<MixtureModeRepr> for MixtureMode {
    type Error = FrameCutError;

    fn try_from(repr: MixtureModeRepr) -> Result<Self, Self::Error> {
        match repr {
            MixtureModeRepr::Index(0) => Ok(MixtureMode::Overlay),
            MixtureModeRepr::Index(1) => Ok(MixtureMode::Add),
            MixtureModeRepr::Index(2) => Ok(MixtureMode::Minus),
            MixtureModeRepr::Index(3) => Ok(MixtureMode::Multiply),
            MixtureModeRepr::Index(4) => Ok(MixtureMode::RemoveColor),
            MixtureModeRepr::Index(other) => {
                Err(FrameCutError::invalid(format!("unknown MixtureMode {other}")))
            }
            MixtureModeRepr::Name(name) => name.parse(),
        }
    }
}

// ── Descriptors ─────────────────────────────────────────────────────

fn enabled_default() -> bool {
    true
}

fn internal_plugin() -> String {
    INTERNAL_PLUGIN_ID.to_string()
}

/// Reference to an effect or mixture implementation plus its argument bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EffectDescriptor {
    #[serde(default = "internal_plugin")]
    pub from_plugin: String,
    #[serde(rename = "Type", alias = "TypeName")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub index: i32,
    #[serde(rename = "Arguments", alias = "Parameters", default)]
    pub arguments: Map<String, Value>,
}

/// Mixtures are referenced with the same shape as effects.
pub type MixtureDescriptor = EffectDescriptor;

impl EffectDescriptor {
    pub fn new(from_plugin: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            from_plugin: from_plugin.into(),
            type_name: type_name.into(),
            name: String::new(),
            enabled: true,
            index: 0,
            arguments: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }

    /// Numeric argument lookup. Accepts JSON numbers and numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.arguments.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Like [`number`](Self::number) but a missing or non-numeric value is an error.
    pub fn require_number(&self, key: &str) -> FrameCutResult<f64> {
        self.number(key).ok_or_else(|| {
            FrameCutError::invalid(format!(
                "{} `{}` needs numeric argument `{key}`",
                self.from_plugin, self.type_name
            ))
        })
    }
}

// ── Placement header ────────────────────────────────────────────────

fn unit_ratio() -> f32 {
    1.0
}

/// Identity, placement and behavior fields shared by every clip variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClipHeader {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub from_plugin: String,
    pub clip_type: ClipKind,
    #[serde(default)]
    pub layer_index: u32,
    #[serde(default)]
    pub start_frame: u32,
    #[serde(default)]
    pub relative_start_frame: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub frame_time: f32,
    #[serde(default = "unit_ratio")]
    pub second_per_frame_ratio: f32,
    #[serde(default)]
    pub mixture_mode: MixtureMode,
    #[serde(default)]
    pub mixture_args: Map<String, Value>,
    #[serde(default)]
    pub effects: Vec<EffectDescriptor>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl ClipHeader {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        from_plugin: impl Into<String>,
        clip_type: ClipKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            from_plugin: from_plugin.into(),
            clip_type,
            layer_index: 0,
            start_frame: 0,
            relative_start_frame: 0,
            duration: 0,
            frame_time: 0.0,
            second_per_frame_ratio: 1.0,
            mixture_mode: MixtureMode::Overlay,
            mixture_args: Map::new(),
            effects: Vec::new(),
            file_path: None,
        }
    }

    /// Whether the clip covers `frame`. Both ends are inclusive.
    pub fn is_active_at(&self, frame: u32) -> bool {
        frame >= self.start_frame && (frame as u64) <= self.start_frame as u64 + self.duration as u64
    }

    /// Map an absolute timeline frame to a frame index in the clip's source.
    ///
    /// The inclusive end frame (`StartFrame + Duration`) maps to the last
    /// source frame of the clip.
    pub fn relative_frame_index(&self, target: u32) -> FrameCutResult<u32> {
        if !self.is_active_at(target) {
            return Err(FrameCutError::invalid(format!(
                "frame {target} is outside clip `{}` ({}..={})",
                self.id,
                self.start_frame,
                self.start_frame as u64 + self.duration as u64
            )));
        }
        let offset = (target - self.start_frame).min(self.duration.saturating_sub(1));
        let scaled = (offset as f64 * self.second_per_frame_ratio as f64).round();
        Ok(self.relative_start_frame.saturating_add(scaled as u32))
    }

    /// Name used in diagnostics: the file path when there is one, else `Clip@<id>`.
    pub fn display_ref(&self) -> String {
        match &self.file_path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => format!("Clip@{}", self.id),
        }
    }

    /// The descriptor of the mixture selected by `MixtureMode`.
    pub fn mixture_descriptor(&self) -> MixtureDescriptor {
        MixtureDescriptor {
            from_plugin: INTERNAL_PLUGIN_ID.to_string(),
            type_name: self.mixture_mode.as_str().to_string(),
            name: String::new(),
            enabled: true,
            index: 0,
            arguments: self.mixture_args.clone(),
        }
    }
}

// ── Behavior ────────────────────────────────────────────────────────

/// Effect and mixture instances resolved once when a clip is constructed.
pub struct ClipBehavior {
    pub effects: Vec<Box<dyn Effect>>,
    pub mixture: Box<dyn Mixture>,
}

impl ClipBehavior {
    /// Instantiate the enabled effects (ordered by `Index`, then declaration
    /// order) and the mixture for `header`. Unresolved identifiers are errors.
    pub fn resolve(header: &ClipHeader, registry: &PluginRegistry) -> FrameCutResult<Self> {
        let mut declared: Vec<&EffectDescriptor> =
            header.effects.iter().filter(|d| d.enabled).collect();
        declared.sort_by_key(|d| d.index);
        let effects = declared
            .into_iter()
            .map(|d| registry.create_effect(d))
            .collect::<FrameCutResult<Vec<_>>>()?;
        let mixture = registry.create_mixture(&header.mixture_descriptor())?;
        Ok(Self { effects, mixture })
    }
}

impl fmt::Debug for ClipBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipBehavior")
            .field(
                "effects",
                &self.effects.iter().map(|e| e.type_name()).collect::<Vec<_>>(),
            )
            .field("mixture", &self.mixture.type_name())
            .finish()
    }
}

/// A timed, positioned unit of visual content on one layer.
///
/// `reinit` must succeed once before the first frame fetch. The compositor
/// only ever reads a clip.
pub trait Clip: Send + Sync {
    fn header(&self) -> &ClipHeader;

    fn behavior(&self) -> &ClipBehavior;

    /// Acquire decode resources. Called again after a failure to retry.
    fn reinit(&mut self, registry: &PluginRegistry) -> FrameCutResult<()>;

    /// Produce source frame `index` scaled to `width` x `height`.
    fn source_frame(&self, index: u32, width: u32, height: u32) -> FrameCutResult<Picture>;

    /// Serialize back into the record shape accepted by the clip creator.
    fn to_record(&self) -> FrameCutResult<Value>;

    /// Length in source frames when the clip knows it.
    fn clip_length(&self) -> Option<u32> {
        Some(self.header().duration)
    }

    fn dispose(&mut self) {}

    /// Produce the picture for absolute timeline frame `target`.
    fn frame(&self, target: u32, width: u32, height: u32) -> FrameCutResult<Picture> {
        let index = self.header().relative_frame_index(target)?;
        self.source_frame(index, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(start: u32, duration: u32) -> ClipHeader {
        let mut h = ClipHeader::new("c1", "clip", INTERNAL_PLUGIN_ID, ClipKind::Photo);
        h.start_frame = start;
        h.duration = duration;
        h
    }

    #[test]
    fn test_active_range_inclusive() {
        let h = header(10, 5);
        assert!(!h.is_active_at(9));
        assert!(h.is_active_at(10));
        assert!(h.is_active_at(15));
        assert!(!h.is_active_at(16));
    }

    #[test]
    fn test_relative_frame_index() {
        let mut h = header(10, 5);
        h.relative_start_frame = 100;
        assert_eq!(h.relative_frame_index(10).unwrap(), 100);
        assert_eq!(h.relative_frame_index(13).unwrap(), 103);
        // The inclusive end frame repeats the last source frame.
        assert_eq!(h.relative_frame_index(15).unwrap(), 104);
        assert!(h.relative_frame_index(16).is_err());
        assert!(h.relative_frame_index(2).is_err());
    }

    #[test]
    fn test_relative_frame_index_with_speed() {
        let mut h = header(0, 10);
        h.second_per_frame_ratio = 2.0;
        assert_eq!(h.relative_frame_index(3).unwrap(), 6);
    }

    #[test]
    fn test_display_ref() {
        let mut h = header(0, 1);
        assert_eq!(h.display_ref(), "Clip@c1");
        h.file_path = Some("/media/a.png".into());
        assert_eq!(h.display_ref(), "/media/a.png");
    }

    #[test]
    fn test_header_deserialize_pascal_case() {
        let h: ClipHeader = serde_json::from_value(json!({
            "Id": "x",
            "FromPlugin": INTERNAL_PLUGIN_ID,
            "ClipType": 2,
            "LayerIndex": 3,
            "StartFrame": 5,
            "Duration": 20,
            "MixtureMode": "Multiply",
            "Effects": [{ "Type": "RemoveColor", "Arguments": { "R": 0 } }]
        }))
        .unwrap();
        assert_eq!(h.clip_type, ClipKind::SolidColor);
        assert_eq!(h.layer_index, 3);
        assert_eq!(h.mixture_mode, MixtureMode::Multiply);
        assert_eq!(h.second_per_frame_ratio, 1.0);
        assert_eq!(h.effects[0].from_plugin, INTERNAL_PLUGIN_ID);
        assert!(h.effects[0].enabled);
    }

    #[test]
    fn test_clip_kind_rejects_unknown() {
        let err = serde_json::from_value::<ClipKind>(json!(42));
        assert!(err.is_err());
        assert_eq!(serde_json::to_value(ClipKind::Text).unwrap(), json!(3));
    }

    #[test]
    fn test_mixture_mode_accepts_index_and_name() {
        let a: MixtureMode = serde_json::from_value(json!(1)).unwrap();
        let b: MixtureMode = serde_json::from_value(json!("overlay")).unwrap();
        assert_eq!(a, MixtureMode::Add);
        assert_eq!(b, MixtureMode::Overlay);
        assert!(serde_json::from_value::<MixtureMode>(json!(9)).is_err());
    }

    #[test]
    fn test_descriptor_aliases_and_numbers() {
        let d: EffectDescriptor = serde_json::from_value(json!({
            "FromPlugin": "p",
            "TypeName": "ReplaceAlpha",
            "Parameters": { "Alpha": "0.25", "Flag": true }
        }))
        .unwrap();
        assert_eq!(d.type_name, "ReplaceAlpha");
        assert_eq!(d.number("Alpha"), Some(0.25));
        assert_eq!(d.number("Flag"), None);
        assert!(d.require_number("Missing").is_err());
    }
}
