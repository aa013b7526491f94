//! Pipeline configuration.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tierstack_storage::StorageConfig;

/// Settings for one pipeline, usually read from a TOML file:
///
/// ```toml
/// node_name = "lobby-1"
/// flush_interval_secs = 300
///
/// [storage]
/// backend = "json_file"
/// path = "data"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name used in log lines.
    pub node_name: String,
    /// Seconds between background flushes of the local tier; 0 disables the
    /// background task.
    pub flush_interval_secs: u64,
    /// Whether the background task also evicts idle objects.
    pub evict_idle: bool,
    /// Whether `LoadBefore` types are preloaded as soon as they are
    /// registered.
    pub preload_on_register: bool,
    /// Durable storage backend. A storage provider passed to the builder
    /// takes precedence.
    pub storage: Option<StorageConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            node_name: "tierstack".to_string(),
            flush_interval_secs: 0,
            evict_idle: true,
            preload_on_register: true,
            storage: None,
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Reads a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// The background flush interval, if enabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}
