//! Retry and timeout policy of the sync engine

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failed drain attempts after which a mutation is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on any single remote call
    #[serde(
        rename = "remote_timeout_ms",
        default = "default_remote_timeout",
        with = "duration_millis"
    )]
    pub remote_timeout: Duration,
    /// How often a reachability probe should run, for hosts that poll
    #[serde(
        rename = "probe_interval_secs",
        default = "default_probe_interval",
        with = "duration_secs"
    )]
    pub probe_interval: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(15)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            remote_timeout: default_remote_timeout(),
            probe_interval: default_probe_interval(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Configuration("max_attempts must be at least 1".to_string()));
        }
        if self.remote_timeout.is_zero() {
            return Err(SyncError::Configuration("remote_timeout_ms must be non-zero".to_string()));
        }
        if self.probe_interval.is_zero() {
            return Err(SyncError::Configuration("probe_interval_secs must be non-zero".to_string()));
        }
        Ok(())
    }
}

// Serialize Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Serialize Duration as seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
