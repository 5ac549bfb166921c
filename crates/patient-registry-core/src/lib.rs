//! Patient Registry Core Library
//!
//! Local-first patient registration backed by an embedded SQLite database,
//! with a raw SQL console and best-effort change sync between tabs.
//!
//! # Architecture
//!
//! ```text
//!   form / list / console (host)
//!              │
//!          Registry ──────────────► Notifier ──► ChangePort (ChannelHub)
//!              │                                      │
//!     Store::acquire()                      other tabs' TabSync
//!              │                                      │
//!   IndexedStore → FileSystem → Memory       RefreshData / FullReload
//!              │
//!     Database (schema applied)
//! ```
//!
//! # Modules
//!
//! - [`store`]: memoized, self-healing storage handle with strategy fallback
//! - [`db`]: schema, patient CRUD and raw statement execution
//! - [`guard`]: statement classification and the destructive-statement denylist
//! - [`notify`]: change events, the outbound port and in-process channels
//! - [`sync`]: tab-side reconciliation
//! - [`config`]: TOML-loadable configuration

pub mod config;
pub mod db;
pub mod guard;
pub mod models;
pub mod notify;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::RegistryConfig;
pub use db::{CommandSummary, Database, DbError, QueryResult, Record};
pub use models::{Gender, Patient, PatientFields};
pub use notify::{
    ChangeEvent, ChangePort, ChannelEndpoint, ChannelHub, ChannelReceiver, Notifier, Operation,
};
pub use store::{InitError, Store, StrategyKind};
pub use sync::{SyncAction, TabSync, Visibility};

use std::sync::Arc;

use guard::StatementKind;
use serde_json::json;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("The database could not be initialized: {0}. Reload to try again.")]
    Initialization(#[from] InitError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("{0}")]
    Denied(#[from] guard::Denied),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Per-tab context object owned by the application root.
///
/// Every operation acquires the storage handle first; mutations publish a
/// change event once they succeed.
pub struct Registry {
    store: Arc<Store>,
    notifier: Notifier,
}

impl Registry {
    /// A registry that publishes nowhere.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_notifier(config, Notifier::disabled())
    }

    pub fn with_notifier(config: RegistryConfig, notifier: Notifier) -> Self {
        Self {
            store: Arc::new(Store::new(config)),
            notifier,
        }
    }

    /// Join `hub` on the configured channel name.
    ///
    /// Returns the endpoint so the host can subscribe for other tabs' events.
    pub fn connect(config: RegistryConfig, hub: &ChannelHub) -> (Self, ChannelEndpoint) {
        let endpoint = hub.open(&config.channel_name);
        let registry = Self::with_notifier(config, Notifier::new(Arc::new(endpoint.clone())));
        (registry, endpoint)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        self.store.config()
    }

    /// Make sure the database is ready (e.g. behind a loading screen).
    pub async fn initialize(&self) -> RegistryResult<()> {
        self.store.acquire().await?;
        Ok(())
    }

    /// Release the handle; the next operation rebuilds it.
    pub async fn reset(&self) {
        self.store.reset().await;
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Register a new patient, returning the assigned id.
    pub async fn insert_patient(&self, fields: &PatientFields) -> RegistryResult<i64> {
        let db = self.store.acquire().await?;
        let id = db.insert_patient(fields).inspect_err(|e| {
            error!(error = %e, "failed to add patient");
        })?;

        info!(id, "patient added");
        self.notifier.notify(
            Operation::PatientAdded,
            Some(json!({
                "id": id,
                "firstName": fields.first_name,
                "lastName": fields.last_name,
            })),
        );
        Ok(id)
    }

    /// All patients by last name, then first name.
    pub async fn list_patients(&self) -> RegistryResult<Vec<Patient>> {
        let db = self.store.acquire().await?;
        Ok(db.list_patients()?)
    }

    pub async fn get_patient(&self, id: i64) -> RegistryResult<Option<Patient>> {
        let db = self.store.acquire().await?;
        Ok(db.get_patient(id)?)
    }

    /// Replace a patient's fields. `false` when the id does not exist.
    pub async fn update_patient(&self, id: i64, fields: &PatientFields) -> RegistryResult<bool> {
        let db = self.store.acquire().await?;
        let updated = db.update_patient(id, fields).inspect_err(|e| {
            error!(id, error = %e, "failed to update patient");
        })?;

        if updated {
            info!(id, "patient updated");
            self.notifier
                .notify(Operation::PatientUpdated, Some(json!({ "id": id })));
        }
        Ok(updated)
    }

    pub async fn delete_patient(&self, id: i64) -> RegistryResult<bool> {
        let db = self.store.acquire().await?;
        let deleted = db.delete_patient(id).inspect_err(|e| {
            error!(id, error = %e, "failed to delete patient");
        })?;

        if deleted {
            info!(id, "patient deleted");
            self.notifier
                .notify(Operation::PatientDeleted, Some(json!({ "id": id })));
        }
        Ok(deleted)
    }

    pub async fn count_patients(&self) -> RegistryResult<i64> {
        let db = self.store.acquire().await?;
        Ok(db.count_patients()?)
    }

    // =========================================================================
    // Query Console
    // =========================================================================

    /// Run one statement from the query console.
    ///
    /// Denied statements fail before the database is touched.
    pub async fn execute(&self, sql: &str) -> RegistryResult<QueryResult> {
        if sql.trim().is_empty() {
            return Err(RegistryError::InvalidInput("query is empty".into()));
        }
        let kind = guard::check(sql).inspect_err(|denied| {
            info!(rule = denied.rule, "blocked destructive statement");
        })?;
        if kind == StatementKind::Empty {
            return Err(RegistryError::InvalidInput("query has no statement".into()));
        }

        let db = self.store.acquire().await?;
        let result = db.execute_raw(sql, &kind).inspect_err(|e| {
            error!(error = %e, "failed to execute query");
        })?;

        if kind.is_mutation() {
            self.notifier.notify(
                Operation::QueryExecuted,
                Some(json!({
                    "command": kind.command_name(),
                    "rowCount": result.row_count(),
                })),
            );
        }
        Ok(result)
    }
}
