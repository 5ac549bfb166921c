//! Persistence strategies and their per-attempt state.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::RegistryConfig;

/// Where a handle keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Durable file in the platform data directory, WAL journal
    IndexedStore,
    /// Durable file in the fallback directory, rollback journal
    FileSystem,
    /// Transient; data is lost when the handle is dropped
    Memory,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::IndexedStore => "indexed_store",
            StrategyKind::FileSystem => "file_system",
            StrategyKind::Memory => "memory",
        }
    }

    pub fn is_durable(&self) -> bool {
        !matches!(self, StrategyKind::Memory)
    }

    /// Database file for durable strategies.
    pub fn database_path(&self, config: &RegistryConfig) -> Option<PathBuf> {
        let file = format!("{}.db", config.database_name);
        match self {
            StrategyKind::IndexedStore => config.resolved_data_dir().map(|dir| dir.join(file)),
            StrategyKind::FileSystem => Some(config.resolved_fallback_dir().join(file)),
            StrategyKind::Memory => None,
        }
    }

    /// Open a raw connection. Schema and probing happen in the store.
    pub(crate) fn connect(&self, config: &RegistryConfig) -> Result<Connection, String> {
        match self {
            StrategyKind::Memory => Connection::open_in_memory().map_err(|e| e.to_string()),
            StrategyKind::IndexedStore | StrategyKind::FileSystem => {
                let path = self
                    .database_path(config)
                    .ok_or_else(|| "no data directory available on this platform".to_string())?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
                }

                let conn = Connection::open(&path)
                    .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
                conn.busy_timeout(Duration::from_secs(5))
                    .map_err(|e| e.to_string())?;
                let journal = match self {
                    StrategyKind::IndexedStore => "WAL",
                    _ => "DELETE",
                };
                conn.pragma_update_and_check(None, "journal_mode", journal, |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| format!("cannot set journal mode on {}: {}", path.display(), e))?;
                Ok(conn)
            }
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one strategy within an initialization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyState {
    Untried,
    Trying,
    Validated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub kind: StrategyKind,
    pub state: StrategyState,
}

impl StrategyAttempt {
    pub fn untried(kind: StrategyKind) -> Self {
        Self {
            kind,
            state: StrategyState::Untried,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_paths() {
        let config = RegistryConfig {
            data_dir: Some("/data".into()),
            fallback_dir: Some("/fallback".into()),
            ..RegistryConfig::default()
        };

        assert_eq!(
            StrategyKind::IndexedStore.database_path(&config),
            Some(PathBuf::from("/data/patient_registration_db.db"))
        );
        assert_eq!(
            StrategyKind::FileSystem.database_path(&config),
            Some(PathBuf::from("/fallback/patient_registration_db.db"))
        );
        assert_eq!(StrategyKind::Memory.database_path(&config), None);
    }

    #[test]
    fn test_connect_durable_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig::durable_in(dir.path().join("nested"));

        let conn = StrategyKind::IndexedStore.connect(&config).unwrap();
        drop(conn);
        assert!(dir
            .path()
            .join("nested")
            .join("patient_registration_db.db")
            .exists());
    }

    #[test]
    fn test_connect_fails_when_dir_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = RegistryConfig::durable_in(file.path());

        let err = StrategyKind::IndexedStore.connect(&config).unwrap_err();
        assert!(err.contains("cannot create"), "got {}", err);
    }
}
