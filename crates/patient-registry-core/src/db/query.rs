//! Raw statement execution for the query console.

use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{Database, DbResult};
use crate::guard::StatementKind;

/// One result row keyed by column name.
pub type Record = Map<String, Value>;

/// Outcome of a statement that produces no rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSummary {
    /// Upper-cased leading keyword, e.g. `INSERT`
    pub operation: String,
    pub row_count: usize,
    pub message: String,
}

impl CommandSummary {
    pub fn new(operation: impl Into<String>, row_count: usize) -> Self {
        let operation = operation.into();
        let message = format!("{} completed successfully", operation);
        Self {
            operation,
            row_count,
            message,
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("operation".into(), Value::from(self.operation.clone()));
        record.insert("rowCount".into(), Value::from(self.row_count));
        record.insert("message".into(), Value::from(self.message.clone()));
        record
    }
}

/// Either the rows a statement returned, or a command summary.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<Record>,
    },
    Command(CommandSummary),
}

impl QueryResult {
    /// Generic record sequence: the rows, or a single summary element.
    pub fn records(&self) -> Vec<Record> {
        match self {
            QueryResult::Rows { rows, .. } => rows.clone(),
            QueryResult::Command(summary) => vec![summary.to_record()],
        }
    }

    /// Column headers for rendering. Summaries use their record keys.
    pub fn columns(&self) -> Vec<String> {
        match self {
            QueryResult::Rows { columns, .. } => columns.clone(),
            QueryResult::Command(_) => vec!["operation".into(), "rowCount".into(), "message".into()],
        }
    }

    pub fn is_rows(&self) -> bool {
        matches!(self, QueryResult::Rows { .. })
    }

    /// Rows returned, or rows affected for commands.
    pub fn row_count(&self) -> usize {
        match self {
            QueryResult::Rows { rows, .. } => rows.len(),
            QueryResult::Command(summary) => summary.row_count,
        }
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(hex::encode(bytes)),
    }
}

impl Database {
    /// Execute one arbitrary statement.
    ///
    /// No safety filtering happens here; see [`crate::guard`].
    pub fn execute_raw(&self, sql: &str, kind: &StatementKind) -> DbResult<QueryResult> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;

            if stmt.column_count() == 0 {
                let changed = stmt.execute([])?;
                let row_count = if kind.is_mutation() { changed } else { 0 };
                return Ok(QueryResult::Command(CommandSummary::new(
                    kind.command_name(),
                    row_count,
                )));
            }

            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();

            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (i, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), to_json(row.get_ref(i)?));
                }
                out.push(record);
            }

            Ok(QueryResult::Rows { columns, rows: out })
        })
    }
}
