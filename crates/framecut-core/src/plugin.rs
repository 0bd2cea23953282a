use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::clip::{Clip, ClipKind, EffectDescriptor, MixtureDescriptor};
use crate::effect::{Computer, Effect, Mixture};
use crate::error::{FrameCutError, FrameCutResult};
use crate::source::{AudioSource, SoundTrack, VideoSource};

/// Plugin API version this host accepts. Plugins built against any other
/// version are skipped at registration.
pub const CURRENT_API_VERSION: u32 = 1;

/// Identifier of the plugin that ships with the host.
pub const INTERNAL_PLUGIN_ID: &str = "framecut.internal";

// ──────────────────────────────────────────────────────────────────────────────
// Core Plugin Trait
// ──────────────────────────────────────────────────────────────────────────────

/// Metadata describing a plugin.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    /// Unique plugin identifier (e.g. "com.example.chroma")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semantic version
    pub version: String,
    pub author: String,
    pub description: String,
    pub author_url: Option<String>,
    pub publishing_url: Option<String>,
    /// Must equal [`CURRENT_API_VERSION`].
    pub api_version: u32,
}

impl fmt::Display for PluginManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} by {}", self.name, self.version, self.author)
    }
}

/// Base trait that all plugins implement.
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    /// The factories this plugin contributes. Read once at registration.
    fn entries(&self) -> PluginEntries;

    /// Called once before the plugin's entries are read.
    fn on_load(&mut self) -> FrameCutResult<()> {
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Factories
// ──────────────────────────────────────────────────────────────────────────────

/// Builds a clip from its serialized record.
pub type ClipFactory =
    Arc<dyn Fn(Value, &PluginRegistry) -> FrameCutResult<Box<dyn Clip>> + Send + Sync>;
/// Builds a fresh clip with default content from `(id, name)`.
pub type ClipProvider =
    Arc<dyn Fn(&str, &str, &PluginRegistry) -> FrameCutResult<Box<dyn Clip>> + Send + Sync>;
pub type EffectFactory =
    Arc<dyn Fn(&EffectDescriptor) -> FrameCutResult<Box<dyn Effect>> + Send + Sync>;
pub type MixtureFactory =
    Arc<dyn Fn(&MixtureDescriptor) -> FrameCutResult<Box<dyn Mixture>> + Send + Sync>;
pub type ComputerFactory = Arc<dyn Fn() -> FrameCutResult<Arc<dyn Computer>> + Send + Sync>;
pub type SoundTrackFactory =
    Arc<dyn Fn(Value, &PluginRegistry) -> FrameCutResult<Box<dyn SoundTrack>> + Send + Sync>;

/// A decoder constructor plus the file extensions it is preferred for.
pub struct SourceFactory<S: ?Sized> {
    pub name: String,
    /// Extensions with or without the leading dot, matched case-insensitively.
    pub preferred_extensions: Vec<String>,
    pub create: Arc<dyn Fn() -> Box<S> + Send + Sync>,
}

pub type VideoSourceFactory = SourceFactory<dyn VideoSource>;
pub type AudioSourceFactory = SourceFactory<dyn AudioSource>;

impl<S: ?Sized> SourceFactory<S> {
    pub fn new(
        name: impl Into<String>,
        preferred_extensions: &[&str],
        create: impl Fn() -> Box<S> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            preferred_extensions: preferred_extensions.iter().map(|e| e.to_string()).collect(),
            create: Arc::new(create),
        }
    }

    fn prefers(&self, extension: Option<&str>) -> bool {
        let Some(ext) = extension else {
            return false;
        };
        self.preferred_extensions
            .iter()
            .any(|p| p.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Everything one plugin provides, keyed by type name or discriminator.
#[derive(Default)]
pub struct PluginEntries {
    pub clips: BTreeMap<ClipKind, ClipFactory>,
    pub clip_providers: BTreeMap<ClipKind, ClipProvider>,
    pub effects: BTreeMap<String, EffectFactory>,
    pub mixtures: BTreeMap<String, MixtureFactory>,
    pub computers: BTreeMap<String, ComputerFactory>,
    pub video_sources: Vec<VideoSourceFactory>,
    pub audio_sources: Vec<AudioSourceFactory>,
    pub sound_track: Option<SoundTrackFactory>,
    pub configuration: BTreeMap<String, String>,
}

impl PluginEntries {
    pub fn with_clip(
        mut self,
        kind: ClipKind,
        factory: impl Fn(Value, &PluginRegistry) -> FrameCutResult<Box<dyn Clip>> + Send + Sync + 'static,
    ) -> Self {
        self.clips.insert(kind, Arc::new(factory));
        self
    }

    pub fn with_clip_provider(
        mut self,
        kind: ClipKind,
        provider: impl Fn(&str, &str, &PluginRegistry) -> FrameCutResult<Box<dyn Clip>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.clip_providers.insert(kind, Arc::new(provider));
        self
    }

    pub fn with_effect(
        mut self,
        type_name: &str,
        factory: impl Fn(&EffectDescriptor) -> FrameCutResult<Box<dyn Effect>> + Send + Sync + 'static,
    ) -> Self {
        self.effects.insert(type_name.to_string(), Arc::new(factory));
        self
    }

    pub fn with_mixture(
        mut self,
        type_name: &str,
        factory: impl Fn(&MixtureDescriptor) -> FrameCutResult<Box<dyn Mixture>> + Send + Sync + 'static,
    ) -> Self {
        self.mixtures.insert(type_name.to_string(), Arc::new(factory));
        self
    }

    pub fn with_computer(
        mut self,
        name: &str,
        factory: impl Fn() -> FrameCutResult<Arc<dyn Computer>> + Send + Sync + 'static,
    ) -> Self {
        self.computers.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn with_video_source(mut self, factory: VideoSourceFactory) -> Self {
        self.video_sources.push(factory);
        self
    }

    pub fn with_audio_source(mut self, factory: AudioSourceFactory) -> Self {
        self.audio_sources.push(factory);
        self
    }

    pub fn with_sound_track(
        mut self,
        factory: impl Fn(Value, &PluginRegistry) -> FrameCutResult<Box<dyn SoundTrack>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.sound_track = Some(Arc::new(factory));
        self
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<String>) -> Self {
        self.configuration.insert(key.to_string(), value.into());
        self
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Plugin Registry
// ──────────────────────────────────────────────────────────────────────────────

struct RegisteredPlugin {
    manifest: PluginManifest,
    entries: PluginEntries,
    _plugin: Box<dyn Plugin>,
}

/// Catalog of every loaded plugin's factories.
///
/// Plugins are registered during startup and the registry is sealed by
/// [`PluginRegistry::init`]. After that it is only read; share it behind an
/// `Arc`. The computer cache is the only interior state and is safe for
/// concurrent readers.
pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    index: HashMap<String, usize>,
    sealed: bool,
    computers: DashMap<String, Arc<dyn Computer>>,
}

impl PluginRegistry {
    /// Create an empty, unsealed registry.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            index: HashMap::new(),
            sealed: false,
            computers: DashMap::new(),
        }
    }

    /// Add one plugin.
    pub fn register(&mut self, mut plugin: Box<dyn Plugin>) -> FrameCutResult<()> {
        if self.sealed {
            return Err(FrameCutError::AlreadyInitialized);
        }
        let manifest = plugin.manifest();
        if manifest.api_version != CURRENT_API_VERSION {
            return Err(FrameCutError::VersionMismatch {
                id: manifest.id,
                found: manifest.api_version,
                expected: CURRENT_API_VERSION,
            });
        }
        if self.index.contains_key(&manifest.id) {
            return Err(FrameCutError::DuplicateId(manifest.id));
        }
        plugin.on_load()?;
        let entries = plugin.entries();
        self.index.insert(manifest.id.clone(), self.plugins.len());
        self.plugins.push(RegisteredPlugin {
            manifest,
            entries,
            _plugin: plugin,
        });
        Ok(())
    }

    /// Register every plugin and seal the registry. Plugins with a
    /// mismatching API version are logged and skipped.
    pub fn init(&mut self, plugins: Vec<Box<dyn Plugin>>) -> FrameCutResult<()> {
        if self.sealed {
            return Err(FrameCutError::AlreadyInitialized);
        }
        for plugin in plugins {
            let manifest = plugin.manifest();
            match self.register(plugin) {
                Ok(()) => tracing::info!("Loaded plugin {} ({})", manifest, manifest.id),
                Err(err @ FrameCutError::VersionMismatch { .. }) => {
                    tracing::warn!("Skipping plugin {}: {}", manifest.id, err);
                }
                Err(err) => return Err(err),
            }
        }
        self.sealed = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.sealed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn manifest(&self, id: &str) -> Option<&PluginManifest> {
        self.index.get(id).map(|&i| &self.plugins[i].manifest)
    }

    /// Manifests in registration order.
    pub fn list(&self) -> Vec<&PluginManifest> {
        self.plugins.iter().map(|p| &p.manifest).collect()
    }

    /// A plugin's configuration map.
    pub fn configuration(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.index.get(id).map(|&i| &self.plugins[i].entries.configuration)
    }

    fn lookup(&self, id: &str) -> FrameCutResult<&RegisteredPlugin> {
        self.index
            .get(id)
            .map(|&i| &self.plugins[i])
            .ok_or_else(|| FrameCutError::PluginNotFound(id.to_string()))
    }

    /// Human-readable summary of what a plugin provides.
    pub fn describe(&self, id: &str) -> FrameCutResult<String> {
        let plugin = self.lookup(id)?;
        let e = &plugin.entries;
        let m = &plugin.manifest;
        let join = |names: Vec<String>| {
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        };
        let sources = |factories: &[SourceFactory<dyn VideoSource>]| {
            factories
                .iter()
                .map(|f| format!("{} [{}]", f.name, f.preferred_extensions.join(" ")))
                .collect::<Vec<_>>()
        };

        let mut out = String::new();
        let _ = writeln!(out, "{} ({})", m, m.id);
        if !m.description.is_empty() {
            let _ = writeln!(out, "  {}", m.description);
        }
        let _ = writeln!(out, "  clips: {}", join(e.clips.keys().map(|k| k.to_string()).collect()));
        let _ = writeln!(out, "  effects: {}", join(e.effects.keys().cloned().collect()));
        let _ = writeln!(out, "  mixtures: {}", join(e.mixtures.keys().cloned().collect()));
        let _ = writeln!(out, "  computers: {}", join(e.computers.keys().cloned().collect()));
        let _ = writeln!(out, "  video sources: {}", join(sources(&e.video_sources)));
        let _ = writeln!(
            out,
            "  audio sources: {}",
            join(e.audio_sources.iter().map(|f| f.name.clone()).collect())
        );
        let _ = write!(
            out,
            "  sound tracks: {}",
            if e.sound_track.is_some() { "yes" } else { "no" }
        );
        Ok(out)
    }

    // ── Clips ──

    /// Build a clip from a serialized record by dispatching on its
    /// `FromPlugin` and `ClipType` fields.
    pub fn create_clip(&self, record: &Value) -> FrameCutResult<Box<dyn Clip>> {
        let from = record
            .get("FromPlugin")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameCutError::invalid("clip record has no FromPlugin"))?;
        let plugin = self.lookup(from)?;
        let unsupported = |clip_type: String| FrameCutError::UnsupportedClipType {
            plugin: from.to_string(),
            clip_type,
        };
        let kind = match record.get("ClipType") {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .and_then(|v| ClipKind::try_from(v).ok())
                .ok_or_else(|| unsupported(n.to_string()))?,
            Some(Value::String(s)) => ALL_KINDS
                .into_iter()
                .find(|k| k.as_str() == s.as_str())
                .ok_or_else(|| unsupported(s.clone()))?,
            _ => return Err(FrameCutError::invalid("clip record has no ClipType")),
        };
        let factory = plugin
            .entries
            .clips
            .get(&kind)
            .ok_or_else(|| unsupported(kind.to_string()))?;
        factory(record.clone(), self)
    }

    /// Build a new clip with default content through a plugin's clip provider.
    pub fn create_new_clip(
        &self,
        plugin_id: &str,
        kind: ClipKind,
        id: &str,
        name: &str,
    ) -> FrameCutResult<Box<dyn Clip>> {
        let plugin = self.lookup(plugin_id)?;
        let provider = plugin.entries.clip_providers.get(&kind).ok_or_else(|| {
            FrameCutError::UnsupportedClipType {
                plugin: plugin_id.to_string(),
                clip_type: kind.to_string(),
            }
        })?;
        provider(id, name, self)
    }

    pub fn create_sound_track(&self, record: &Value) -> FrameCutResult<Box<dyn SoundTrack>> {
        let from = record
            .get("FromPlugin")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameCutError::invalid("sound track record has no FromPlugin"))?;
        let plugin = self.lookup(from)?;
        let factory = plugin.entries.sound_track.as_ref().ok_or_else(|| {
            FrameCutError::unsupported(format!("plugin `{from}` provides no sound tracks"))
        })?;
        factory(record.clone(), self)
    }

    // ── Effects and mixtures ──

    pub fn create_effect(&self, descriptor: &EffectDescriptor) -> FrameCutResult<Box<dyn Effect>> {
        let plugin = self.lookup(&descriptor.from_plugin)?;
        let factory = plugin
            .entries
            .effects
            .get(&descriptor.type_name)
            .ok_or_else(|| FrameCutError::UnsupportedEffectType {
                plugin: descriptor.from_plugin.clone(),
                effect: descriptor.type_name.clone(),
            })?;
        factory(descriptor)
    }

    pub fn create_mixture(
        &self,
        descriptor: &MixtureDescriptor,
    ) -> FrameCutResult<Box<dyn Mixture>> {
        let plugin = self.lookup(&descriptor.from_plugin)?;
        let factory = plugin
            .entries
            .mixtures
            .get(&descriptor.type_name)
            .ok_or_else(|| FrameCutError::UnsupportedMixtureType {
                plugin: descriptor.from_plugin.clone(),
                mixture: descriptor.type_name.clone(),
            })?;
        factory(descriptor)
    }

    // ── Computers ──

    /// Return the computer for `name`, creating it on first use. The first
    /// plugin (in registration order) whose factory succeeds wins and the
    /// instance is reused for every later lookup.
    pub fn create_computer(&self, name: &str) -> FrameCutResult<Arc<dyn Computer>> {
        if let Some(cached) = self.computers.get(name) {
            return Ok(Arc::clone(cached.value()));
        }
        let computer = self.create_computer_uncached(name)?;
        let entry = self
            .computers
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&computer));
        Ok(Arc::clone(entry.value()))
    }

    /// Create a computer without consulting or filling the cache.
    pub fn create_computer_uncached(&self, name: &str) -> FrameCutResult<Arc<dyn Computer>> {
        for plugin in &self.plugins {
            let Some(factory) = plugin.entries.computers.get(name) else {
                continue;
            };
            match factory() {
                Ok(computer) => return Ok(computer),
                Err(err) => tracing::warn!(
                    "Plugin {} failed to create computer {}: {}",
                    plugin.manifest.id,
                    name,
                    err
                ),
            }
        }
        Err(FrameCutError::ComputerNotFound(name.to_string()))
    }

    /// Number of cached computer instances.
    pub fn cached_computers(&self) -> usize {
        self.computers.len()
    }

    // ── Sources ──

    /// Open a video file. Factories preferring the file's extension are tried
    /// first, then every other factory in registration order. Probe failures
    /// are discarded. Paths starting with `#` name virtual sources and skip
    /// the existence check.
    pub fn create_video_source(&self, path: &Path) -> FrameCutResult<Box<dyn VideoSource>> {
        let factories: Vec<&VideoSourceFactory> = self
            .plugins
            .iter()
            .flat_map(|p| p.entries.video_sources.iter())
            .collect();
        open_source(
            factories,
            path,
            |s: &mut Box<dyn VideoSource>, p| s.initialize(p),
            |s| s.dispose(),
        )
    }

    /// Open an audio file, with the same selection rules as video.
    pub fn create_audio_source(&self, path: &Path) -> FrameCutResult<Box<dyn AudioSource>> {
        let factories: Vec<&AudioSourceFactory> = self
            .plugins
            .iter()
            .flat_map(|p| p.entries.audio_sources.iter())
            .collect();
        open_source(
            factories,
            path,
            |s: &mut Box<dyn AudioSource>, p| s.initialize(p),
            |s| s.dispose(),
        )
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const ALL_KINDS: [ClipKind; 7] = [
    ClipKind::Video,
    ClipKind::Photo,
    ClipKind::SolidColor,
    ClipKind::Text,
    ClipKind::Audio,
    ClipKind::Special,
    ClipKind::Extend,
];

fn open_source<S: ?Sized>(
    factories: Vec<&SourceFactory<S>>,
    path: &Path,
    initialize: impl Fn(&mut Box<S>, &Path) -> FrameCutResult<()>,
    dispose: impl Fn(&mut Box<S>),
) -> FrameCutResult<Box<S>> {
    let is_virtual = path.to_string_lossy().starts_with('#');
    if !is_virtual && !path.exists() {
        return Err(FrameCutError::FileNotFound(path.to_path_buf()));
    }
    let extension = path.extension().and_then(|e| e.to_str());
    let (preferred, others): (Vec<_>, Vec<_>) =
        factories.into_iter().partition(|f| f.prefers(extension));

    for factory in preferred.into_iter().chain(others) {
        let mut source = (factory.create)();
        match initialize(&mut source, path) {
            Ok(()) => {
                tracing::debug!("Opened {} with {}", path.display(), factory.name);
                return Ok(source);
            }
            Err(err) => {
                tracing::debug!("{} cannot open {}: {}", factory.name, path.display(), err);
                dispose(&mut source);
            }
        }
    }
    Err(FrameCutError::resource("no registered source can open this file", path))
}
