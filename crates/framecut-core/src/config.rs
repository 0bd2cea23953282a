use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::accelerator::ExecutionMode;
use crate::Color;

/// Errors raised while assembling the backend configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid output size `{0}`, expected <width>,<height>")]
    InvalidOutput(String),

    #[error("unsupported accelerator type `{0}`, expected auto, cpu or gpu")]
    UnsupportedAccelerator(String),

    #[error("failed to load config {path:?}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Output frame dimensions, written as `<width>,<height>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for OutputSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidOutput(s.to_string());
        let (w, h) = s.split_once(',').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for OutputSize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputSize> for String {
    fn from(size: OutputSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for OutputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.width, self.height)
    }
}

/// Which accelerator the backend should run its kernels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorSelector {
    /// GPU when one is available, otherwise CPU.
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl FromStr for AcceleratorSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            _ => Err(ConfigError::UnsupportedAccelerator(s.to_string())),
        }
    }
}

impl fmt::Display for AcceleratorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AcceleratorConfig {
    #[serde(rename = "type")]
    pub selector: AcceleratorSelector,
    pub device_id: usize,
    /// Serialize every kernel dispatch behind one lock.
    pub force_sync: bool,
}

impl AcceleratorConfig {
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.force_sync {
            ExecutionMode::Synchronous
        } else {
            ExecutionMode::Concurrent
        }
    }
}

/// Backend settings as read from a TOML file. Every field is optional here;
/// command-line flags fill or override them before [`BackendConfig::validate`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub pipe: Option<String>,
    pub raw_data_pipe: Option<String>,
    pub output: Option<OutputSize>,
    pub temp_folder: Option<PathBuf>,
    pub accelerator: AcceleratorConfig,
    /// Picture returned for frames where no clip is active.
    pub background: Color,
}

/// Fully resolved settings the service runs with.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub pipe: String,
    pub raw_data_pipe: String,
    pub output: OutputSize,
    pub temp_folder: PathBuf,
    pub accelerator: AcceleratorConfig,
    pub background: Color,
}

impl BackendConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let load_err = |message: String| ConfigError::Load {
            path: path.to_path_buf(),
            message,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| load_err(e.to_string()))
    }

    /// Check that every required setting is present.
    pub fn validate(self) -> Result<ServiceSettings, ConfigError> {
        let non_empty = |v: Option<String>, name: &'static str| {
            v.filter(|s| !s.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        Ok(ServiceSettings {
            pipe: non_empty(self.pipe, "pipe")?,
            raw_data_pipe: non_empty(self.raw_data_pipe, "raw_data_pipe")?,
            output: self.output.ok_or(ConfigError::Missing("output"))?,
            temp_folder: self
                .temp_folder
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or(ConfigError::Missing("temp_folder"))?,
            accelerator: self.accelerator,
            background: self.background,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size_parse() {
        let size: OutputSize = "1920,1080".parse().unwrap();
        assert_eq!((size.width, size.height), (1920, 1080));
        assert_eq!(size.to_string(), "1920,1080");
        assert!("1920x1080".parse::<OutputSize>().is_err());
        assert!("0,1080".parse::<OutputSize>().is_err());
        assert!("abc,1".parse::<OutputSize>().is_err());
    }

    #[test]
    fn test_accelerator_selector_parse() {
        assert_eq!("GPU".parse::<AcceleratorSelector>().unwrap(), AcceleratorSelector::Gpu);
        assert!(matches!(
            "cuda".parse::<AcceleratorSelector>(),
            Err(ConfigError::UnsupportedAccelerator(_))
        ));
    }

    #[test]
    fn test_config_from_toml() {
        let config: BackendConfig = toml::from_str(
            r##"
pipe = "framecut-ctl"
raw_data_pipe = "framecut-raw"
output = "640,360"
temp_folder = "/tmp/framecut"
background = "#000000"

[accelerator]
type = "cpu"
force_sync = true
"##,
        )
        .unwrap();
        assert_eq!(config.accelerator.selector, AcceleratorSelector::Cpu);
        assert_eq!(config.accelerator.execution_mode(), ExecutionMode::Synchronous);
        let settings = config.validate().unwrap();
        assert_eq!(settings.output, OutputSize { width: 640, height: 360 });
    }

    #[test]
    fn test_validate_reports_missing() {
        let config = BackendConfig {
            pipe: Some("p".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("raw_data_pipe"))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(BackendConfig::load_from_file(Path::new("/nonexistent/framecut.toml")).is_err());
    }
}
