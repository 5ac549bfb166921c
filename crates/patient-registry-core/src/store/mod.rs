//! Storage handle: lazily built, memoized, self-healing.
//!
//! A [`Store`] owns at most one live [`Database`]. All acquisitions go through
//! one async mutex, so callers that arrive while the handle is being built
//! wait for that build and receive the same `Arc`.

mod strategy;

pub use strategy::*;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::db::{schema, Database};

/// Fatal initialization failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("no persistence strategy could be initialized after {passes} attempt(s): {}", describe(.failures))]
    Exhausted {
        passes: u32,
        failures: Vec<(StrategyKind, String)>,
    },
}

fn describe(failures: &[(StrategyKind, String)]) -> String {
    if failures.is_empty() {
        return "no strategies configured".into();
    }
    failures
        .iter()
        .map(|(kind, reason)| format!("{}: {}", kind, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// How an acquisition obtained its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The cached handle passed its probe
    Cached,
    /// No handle existed yet (first use or after reset)
    Initialized,
    /// The cached handle failed its probe and was rebuilt
    Recovered,
}

#[derive(Default)]
struct Slot {
    handle: Option<Arc<Database>>,
    attempts: Vec<StrategyAttempt>,
    generation: u64,
}

pub struct Store {
    config: RegistryConfig,
    slot: Mutex<Slot>,
}

impl Store {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the live handle, building or rebuilding it as needed.
    pub async fn acquire(&self) -> Result<Arc<Database>, InitError> {
        self.acquire_tracked().await.map(|(handle, _)| handle)
    }

    /// Like [`Store::acquire`], also reporting how the handle was obtained.
    pub async fn acquire_tracked(&self) -> Result<(Arc<Database>, Acquired), InitError> {
        let mut slot = self.slot.lock().await;

        let mut acquired = Acquired::Initialized;
        if let Some(handle) = slot.handle.clone() {
            match handle.probe() {
                Ok(()) => return Ok((handle, Acquired::Cached)),
                Err(e) => {
                    warn!(
                        generation = handle.generation(),
                        error = %e,
                        "database handle failed liveness probe, reinitializing"
                    );
                    if let Err(e) = handle.close() {
                        warn!(error = %e, "error closing stale database handle");
                    }
                    slot.handle = None;
                    acquired = Acquired::Recovered;
                }
            }
        }

        let handle = Arc::new(self.initialize(&mut slot).await?);
        slot.handle = Some(handle.clone());
        Ok((handle, acquired))
    }

    /// Re-validate the handle; `true` when it had to be (re)built.
    pub async fn revalidate(&self) -> Result<bool, InitError> {
        let (_, acquired) = self.acquire_tracked().await?;
        Ok(acquired != Acquired::Cached)
    }

    /// Close the handle and clear initialization state.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.handle.take() {
            if let Err(e) = handle.close() {
                warn!(error = %e, "error closing database handle during reset");
            }
            info!(generation = handle.generation(), "database handle released");
        }
        slot.attempts.clear();
    }

    /// Strategy states from the most recent initialization pass.
    pub async fn attempts(&self) -> Vec<StrategyAttempt> {
        self.slot.lock().await.attempts.clone()
    }

    /// Whether a handle is currently cached. Does not probe.
    pub async fn is_initialized(&self) -> bool {
        self.slot.lock().await.handle.is_some()
    }

    async fn initialize(&self, slot: &mut Slot) -> Result<Database, InitError> {
        let passes = self.config.init_attempts.max(1);
        let mut backoff = self.config.init_backoff();

        for pass in 1..=passes {
            slot.generation += 1;
            match self.run_chain(slot).await {
                Some(db) => {
                    info!(
                        strategy = %db.strategy(),
                        generation = db.generation(),
                        "database initialized"
                    );
                    return Ok(db);
                }
                None if pass < passes => {
                    warn!(pass, ?backoff, "all persistence strategies failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                None => {}
            }
        }

        let failures = slot
            .attempts
            .iter()
            .filter_map(|attempt| match &attempt.state {
                StrategyState::Failed(reason) => Some((attempt.kind, reason.clone())),
                _ => None,
            })
            .collect();
        Err(InitError::Exhausted { passes, failures })
    }

    /// One pass over the strategy chain.
    async fn run_chain(&self, slot: &mut Slot) -> Option<Database> {
        slot.attempts = self
            .config
            .strategies
            .iter()
            .copied()
            .map(StrategyAttempt::untried)
            .collect();

        for index in 0..slot.attempts.len() {
            let kind = slot.attempts[index].kind;
            slot.attempts[index].state = StrategyState::Trying;
            debug!(strategy = %kind, "trying persistence strategy");

            match self.try_strategy(kind, slot.generation).await {
                Ok(db) => {
                    slot.attempts[index].state = StrategyState::Validated;
                    return Some(db);
                }
                Err(reason) => {
                    warn!(strategy = %kind, %reason, "persistence strategy failed");
                    slot.attempts[index].state = StrategyState::Failed(reason);
                }
            }
        }
        None
    }

    /// Attempt, validate, or report why not.
    async fn try_strategy(&self, kind: StrategyKind, generation: u64) -> Result<Database, String> {
        let conn = kind.connect(&self.config)?;

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| format!("probe failed: {}", e))?;
        schema::apply(&conn).map_err(|e| format!("schema setup failed: {}", e))?;

        Ok(Database::new(conn, kind, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_memoizes() {
        let store = Store::new(RegistryConfig::in_memory());

        let first = store.acquire().await.unwrap();
        let second = store.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.strategy(), StrategyKind::Memory);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_shares_build() {
        let config = RegistryConfig {
            settle_delay_ms: 20,
            ..RegistryConfig::in_memory()
        };
        let store = Store::new(config);

        let (a, b, c) = tokio::join!(store.acquire(), store.acquire(), store.acquire());
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(a.generation(), 1);
    }

    #[tokio::test]
    async fn test_closed_handle_is_recovered() {
        let store = Store::new(RegistryConfig::in_memory());
        let first = store.acquire().await.unwrap();
        first.close().unwrap();

        let (second, how) = store.acquire_tracked().await.unwrap();
        assert_eq!(how, Acquired::Recovered);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.generation() > first.generation());
        assert!(second.probe().is_ok());
    }

    #[tokio::test]
    async fn test_reset_forces_rebuild() {
        let store = Store::new(RegistryConfig::in_memory());
        let first = store.acquire().await.unwrap();

        store.reset().await;
        assert!(first.is_closed());
        assert!(!store.is_initialized().await);

        let (second, how) = store.acquire_tracked().await.unwrap();
        assert_eq!(how, Acquired::Initialized);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_revalidate() {
        let store = Store::new(RegistryConfig::in_memory());
        assert!(store.revalidate().await.unwrap());
        assert!(!store.revalidate().await.unwrap());

        store.acquire().await.unwrap().close().unwrap();
        assert!(store.revalidate().await.unwrap());
    }

    #[tokio::test]
    async fn test_falls_through_to_memory() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let store = Store::new(RegistryConfig::durable_in(blocker.path()));

        let handle = store.acquire().await.unwrap();
        assert_eq!(handle.strategy(), StrategyKind::Memory);

        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].kind, StrategyKind::IndexedStore);
        assert!(matches!(attempts[0].state, StrategyState::Failed(_)));
        assert_eq!(attempts[1].state, StrategyState::Validated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_file_system() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            data_dir: Some(blocker.path().to_path_buf()),
            fallback_dir: Some(fallback.path().to_path_buf()),
            strategies: vec![StrategyKind::IndexedStore, StrategyKind::FileSystem],
            settle_delay_ms: 200,
            ..RegistryConfig::default()
        };
        let store = Store::new(config);

        let started = tokio::time::Instant::now();
        let handle = store.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));

        assert_eq!(handle.strategy(), StrategyKind::FileSystem);
        let attempts = store.attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(matches!(attempts[0].state, StrategyState::Failed(_)));
        assert_eq!(attempts[1].state, StrategyState::Validated);

        let journal: String = handle
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(journal, "delete");
        assert!(fallback.path().join("patient_registration_db.db").exists());
    }

    #[tokio::test]
    async fn test_exhausted_strategies() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let config = RegistryConfig {
            data_dir: Some(blocker.path().to_path_buf()),
            strategies: vec![StrategyKind::IndexedStore],
            init_attempts: 2,
            init_backoff_ms: 1,
            settle_delay_ms: 0,
            ..RegistryConfig::default()
        };
        let store = Store::new(config);

        let err = store.acquire().await.unwrap_err();
        let InitError::Exhausted { passes, failures } = &err;
        assert_eq!(*passes, 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, StrategyKind::IndexedStore);
        assert!(err.to_string().contains("indexed_store"));
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn test_no_strategies_configured() {
        let config = RegistryConfig {
            strategies: vec![],
            ..RegistryConfig::in_memory()
        };
        let err = Store::new(config).acquire().await.unwrap_err();
        assert!(err.to_string().contains("no strategies configured"));
    }

    #[tokio::test]
    async fn test_durable_survives_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(RegistryConfig::durable_in(dir.path()));

        let handle = store.acquire().await.unwrap();
        assert_eq!(handle.strategy(), StrategyKind::IndexedStore);
        handle
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO patients (first_name, last_name, date_of_birth, gender) VALUES ('A', 'B', '2000-01-01', 'male')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        drop(handle);

        store.reset().await;
        let handle = store.acquire().await.unwrap();
        assert_eq!(handle.count_patients().unwrap(), 1);
    }
}
