use std::path::PathBuf;

use thiserror::Error;

use crate::features::FeatureError;

/// Errors raised while loading or validating a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A value is outside its allowed range.
    #[error("Invalid config value for `{field}`: {message}")]
    Invalid { field: String, message: String },
    /// The declared score sources do not form a valid feature layout.
    #[error("Invalid feature layout: {0}")]
    Features(#[from] FeatureError),
    /// No usable default work directory.
    #[error("No suitable base directory found for the work directory")]
    NoWorkDir,
    /// Failed to create a configured directory.
    #[error("Unable to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
