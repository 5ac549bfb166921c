//! SQLite schema definition.
//!
//! Applied to every fresh or recovered connection, so every statement must be
//! safe to re-run.

/// Patients table.
pub const CREATE_PATIENTS: &str = r#"
CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,        -- AUTOINCREMENT: ids are never reused
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT NOT NULL                  -- YYYY-MM-DD, a real calendar date
        CHECK (date(date_of_birth) IS NOT NULL AND date(date_of_birth) = date_of_birth),
    gender TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    address TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
)
"#;

/// Name index backing the list ordering.
pub const CREATE_NAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(last_name, first_name)";

/// Keeps `updated_at` current. Dropped and recreated so a changed body
/// replaces the old one. Statements that set `updated_at` themselves win.
pub const REPLACE_TOUCH_TRIGGER: &str = r#"
DROP TRIGGER IF EXISTS patients_touch_updated_at;
CREATE TRIGGER patients_touch_updated_at AFTER UPDATE ON patients
FOR EACH ROW WHEN new.updated_at = old.updated_at
BEGIN
    UPDATE patients
    SET updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
    WHERE id = new.id;
END;
"#;

/// Schema steps in application order.
pub fn all_schema_statements() -> [&'static str; 3] {
    [CREATE_PATIENTS, CREATE_NAME_INDEX, REPLACE_TOUCH_TRIGGER]
}

/// Apply the full schema to a connection.
pub fn apply(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    for stmt in all_schema_statements() {
        conn.execute_batch(stmt)?;
    }
    Ok(())
}
