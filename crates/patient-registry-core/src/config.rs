//! Registry configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StrategyKind;

pub const DEFAULT_DATABASE_NAME: &str = "patient_registration_db";
pub const DEFAULT_CHANNEL_NAME: &str = "patient_app_channel";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// File stem shared by the durable strategies
    pub database_name: String,
    /// Directory for [`StrategyKind::IndexedStore`]; platform data dir if unset
    pub data_dir: Option<PathBuf>,
    /// Directory for [`StrategyKind::FileSystem`]; temp dir if unset
    pub fallback_dir: Option<PathBuf>,
    /// Persistence strategies, tried in order
    pub strategies: Vec<StrategyKind>,
    pub settle_delay_ms: u64,
    /// Full passes over the strategy chain before giving up
    pub init_attempts: u32,
    /// Delay before the second pass; doubles after each failed pass
    pub init_backoff_ms: u64,
    pub channel_name: String,
    pub liveness_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.into(),
            data_dir: None,
            fallback_dir: None,
            strategies: vec![
                StrategyKind::IndexedStore,
                StrategyKind::FileSystem,
                StrategyKind::Memory,
            ],
            settle_delay_ms: 200,
            init_attempts: 3,
            init_backoff_ms: 100,
            channel_name: DEFAULT_CHANNEL_NAME.into(),
            liveness_interval_secs: 30,
        }
    }
}

impl RegistryConfig {
    /// Memory-only storage with no settle delay (for testing).
    pub fn in_memory() -> Self {
        Self {
            strategies: vec![StrategyKind::Memory],
            settle_delay_ms: 0,
            init_attempts: 1,
            init_backoff_ms: 0,
            ..Self::default()
        }
    }

    /// Durable storage rooted at `dir`, falling back to memory.
    pub fn durable_in(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            strategies: vec![StrategyKind::IndexedStore, StrategyKind::Memory],
            settle_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn init_backoff(&self) -> Duration {
        Duration::from_millis(self.init_backoff_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("patient-registry")))
    }

    pub fn resolved_fallback_dir(&self) -> PathBuf {
        self.fallback_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("patient-registry"))
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`RegistryConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
