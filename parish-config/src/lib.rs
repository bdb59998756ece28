//! Configuration loading for Parish
//!
//! Sources are layered, later ones winning:
//!
//! 1. Built-in defaults
//! 2. `parish.yaml` / `parish.toml` in the working directory (optional)
//! 3. Files added with [`ConfigLoader::file`]
//! 4. Environment variables prefixed `PARISH_`, with `__` separating
//!    nesting levels (`PARISH_SYNC__MAX_ATTEMPTS=3`)
//!
//! # Example
//!
//! ```no_run
//! use parish_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().file("/etc/parish/parish.yaml").load()?;
//! println!("draining to {}", config.remote.base_url);
//! # Ok::<(), parish_config::ConfigError>(())
//! ```

pub mod error;

pub use error::*;

use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use parish_logging::LoggerConfig;
use parish_sync::{LocalStoreConfig, RestRemoteConfig, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "PARISH_";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: LocalStoreConfig,
    #[serde(default)]
    pub remote: RestRemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.sync
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.storage.db_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("storage.db_path must not be empty".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }

        let base_url = self.remote.base_url.as_str();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "remote.base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        if !LOG_LEVELS.contains(&self.logging.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.log_level
            )));
        }

        Ok(())
    }
}

/// Builds an [`AppConfig`] from layered sources
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    files: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer an explicit YAML or TOML file on top of the defaults. Unlike
    /// the working-directory files it must exist.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// The merged figment, before extraction
    pub fn figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file("parish.yaml"))
            .merge(Toml::file("parish.toml"));

        for path in &self.files {
            if !path.is_file() {
                return Err(ConfigError::SourceNotFound(path.clone()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                _ => return Err(ConfigError::UnsupportedFormat(path.clone())),
            };
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn load(&self) -> ConfigResult<AppConfig> {
        let config: AppConfig = self.figment()?.extract()?;
        config.validate()?;

        tracing::debug!(
            files = self.files.len(),
            db_path = %config.storage.db_path.display(),
            base_url = %config.remote.base_url,
            max_attempts = config.sync.max_attempts,
            "Configuration loaded"
        );

        Ok(config)
    }
}
