//! Configuration system
//!
//! Bad files or unknown options are logged and replaced with safe defaults
//! rather than propagated as fatal errors.

mod renderer;

pub use renderer::{
    AspectRatio, AstcDecodeMode, AstcRecompression, RendererConfig, ScalingFilter, VRamUsageMode,
    VsyncMode,
};
pub use serde::{Deserialize, Serialize};

/// Configuration trait implemented by top-level config structs.
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file, falling back to defaults on any error.
    ///
    /// A bad file or unknown option is reported to the
    /// logger and safe defaults are substituted rather than propagated.
    fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("config: failed to load {path}: {err}, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from file, returning the parse/IO error.
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file.
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be parsed in its declared format.
    #[error("parse error: {0}")]
    Parse(String),

    /// The config value failed validation (e.g. `fsr_sharpening_slider` out of range).
    #[error("invalid value: {0}")]
    Invalid(String),

    /// Serialization error when writing a config back out.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// The file extension does not map to a supported format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}
