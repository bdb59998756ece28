//! Structured logging for Parish with member PII redaction
//!
//! Church records carry personal data (names, e-mail addresses, phone
//! numbers, home addresses). Everything that logs a payload goes through
//! [`redact_payload`], which masks sensitive keys and scrubs e-mail and phone
//! patterns from free text.
//!
//! # Example
//!
//! ```no_run
//! use parish_logging::{init, LoggerConfig};
//!
//! init(&LoggerConfig::default()).expect("logging");
//! tracing::info!("Parish sync starting");
//! ```

pub mod config;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_subscriber::{fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

lazy_static! {
    static ref DEFAULT_REDACTOR: PiiRedactor = PiiRedactor::default();
}

static REDACTION_ENABLED: AtomicBool = AtomicBool::new(true);

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init(config: &LoggerConfig) -> Result<(), LoggingError> {
    REDACTION_ENABLED.store(config.redaction_enabled, Ordering::Relaxed);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level))
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    }
    .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

fn default_directives(level: &str) -> String {
    format!(
        "parish_sync={level},parish_config={level},parish={level},sqlx=warn,reqwest=info,{level}"
    )
}

/// Render a JSON payload for a log line, redacted unless redaction was
/// switched off at [`init`].
pub fn redact_payload(value: &serde_json::Value) -> String {
    if REDACTION_ENABLED.load(Ordering::Relaxed) {
        DEFAULT_REDACTOR.redact_json(value).to_string()
    } else {
        value.to_string()
    }
}
