/// Core error types for the FrameCut render backend.
use std::path::PathBuf;

/// A specialized Result type for FrameCut operations.
pub type FrameCutResult<T> = Result<T, FrameCutError>;

/// Top-level error type shared by the registry, the clip model, the
/// compositor and the accelerators.
#[derive(Debug, thiserror::Error)]
pub enum FrameCutError {
    #[error("plugin `{0}` is already registered")]
    DuplicateId(String),

    #[error("plugin `{id}` targets API version {found}, host supports {expected}")]
    VersionMismatch { id: String, found: u32, expected: u32 },

    #[error("plugin registry is already initialized")]
    AlreadyInitialized,

    #[error("plugin `{0}` not found")]
    PluginNotFound(String),

    #[error("plugin `{plugin}` cannot create clip type `{clip_type}`")]
    UnsupportedClipType { plugin: String, clip_type: String },

    #[error("plugin `{plugin}` does not provide effect `{effect}`")]
    UnsupportedEffectType { plugin: String, effect: String },

    #[error("plugin `{plugin}` does not provide mixture `{mixture}`")]
    UnsupportedMixtureType { plugin: String, mixture: String },

    #[error("no plugin provides computer `{0}`")]
    ComputerNotFound(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(
        "clips ({}) in layer {layer} overlap at frame {frame}",
        .clips.join(", ")
    )]
    OverlappingLayers {
        layer: u32,
        frame: u32,
        clips: Vec<String>,
    },

    #[error("resource error: {message} ({path:?})")]
    Resource {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("file not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("accelerator error: {0}")]
    Device(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FrameCutError {
    /// Create a resource error tied to a file on disk.
    pub fn resource(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        FrameCutError::Resource {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a resource error with no backing file (synthetic sources, uninitialized clips).
    pub fn resource_unbound(message: impl Into<String>) -> Self {
        FrameCutError::Resource {
            message: message.into(),
            path: None,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        FrameCutError::UnsupportedOperation(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        FrameCutError::InvalidArgument(message.into())
    }
}
