//! Database layer for the patient registry.

mod patients;
mod query;
pub mod schema;

#[allow(unused_imports)]
pub use patients::*;
pub use query::*;

use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, ErrorCode};
use thiserror::Error;

use crate::store::StrategyKind;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database handle is closed")]
    Closed,

    #[error("Database lock poisoned: {0}")]
    Poisoned(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => DbError::Constraint(e.to_string()),
            _ => DbError::Sqlite(e),
        }
    }
}

impl<T> From<PoisonError<T>> for DbError {
    fn from(e: PoisonError<T>) -> Self {
        DbError::Poisoned(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// The live connection handle for one tab.
///
/// Built by [`crate::store::Store`]; shared as `Arc<Database>` between all
/// callers until it is closed or fails its liveness probe.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Option<Connection>>,
    strategy: StrategyKind,
    generation: u64,
}

impl Database {
    /// Wrap a connection that already has the schema applied.
    pub(crate) fn new(conn: Connection, strategy: StrategyKind, generation: u64) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            strategy,
            generation,
        }
    }

    /// Open a standalone in-memory database with the schema applied.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self::new(conn, StrategyKind::Memory, 0))
    }

    /// Persistence strategy that produced this handle.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Build counter; a rebuilt handle always has a higher generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Trivial liveness query.
    pub fn probe(&self) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    /// Close the underlying connection. Later calls fail with [`DbError::Closed`].
    pub fn close(&self) -> DbResult<()> {
        let conn = self.conn.lock()?.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| DbError::from(e))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    /// Run `f` against the raw connection (for advanced queries).
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let guard = self.conn.lock()?;
        let conn = guard.as_ref().ok_or(DbError::Closed)?;
        f(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
                let names: Vec<String> = stmt
                    .query_map([], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(names)
            })
            .unwrap();

        assert!(tables.contains(&"patients".to_string()));
    }

    #[test]
    fn test_probe_after_close() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.probe().is_ok());

        db.close().unwrap();
        assert!(db.is_closed());
        assert!(matches!(db.probe(), Err(DbError::Closed)));
        // closing twice is harmless
        assert!(db.close().is_ok());
    }

    #[test]
    fn test_constraint_error_mapping() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO patients (first_name, last_name, date_of_birth) VALUES ('A', 'B', '2000-01-01')",
                    [],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)), "got {:?}", err);
    }
}
