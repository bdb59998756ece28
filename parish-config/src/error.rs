use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Configuration parsing failed: {0}")]
    ParseError(#[from] figment::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
