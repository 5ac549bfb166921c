//! Best-effort change notification.
//!
//! The core publishes [`ChangeEvent`]s through a [`ChangePort`]; the host picks
//! the transport. Delivery is never part of an operation's outcome.

mod channel;

pub use channel::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Message type carried by every change event.
pub const DB_UPDATED: &str = "DB_UPDATED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PatientAdded,
    PatientUpdated,
    PatientDeleted,
    QueryExecuted,
    Unknown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PatientAdded => "PATIENT_ADDED",
            Operation::PatientUpdated => "PATIENT_UPDATED",
            Operation::PatientDeleted => "PATIENT_DELETED",
            Operation::QueryExecuted => "QUERY_EXECUTED",
            Operation::Unknown => "unknown",
        }
    }

    /// Unrecognised names map to [`Operation::Unknown`].
    pub fn parse(name: &str) -> Self {
        match name {
            "PATIENT_ADDED" => Operation::PatientAdded,
            "PATIENT_UPDATED" => Operation::PatientUpdated,
            "PATIENT_DELETED" => Operation::PatientDeleted,
            "QUERY_EXECUTED" => Operation::QueryExecuted,
            _ => Operation::Unknown,
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Operation::parse(&name))
    }
}

/// Cross-tab message: `{ type, operation, timestamp, data? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "unknown_operation")]
    pub operation: Operation,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn unknown_operation() -> Operation {
    Operation::Unknown
}

impl ChangeEvent {
    pub fn new(operation: Operation, data: Option<Value>) -> Self {
        Self {
            kind: DB_UPDATED.into(),
            operation,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn is_db_update(&self) -> bool {
        self.kind == DB_UPDATED
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to serialize change event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound event port.
pub trait ChangePort: Send + Sync {
    fn publish(&self, event: &ChangeEvent) -> Result<(), NotifyError>;
}

/// Publishes change events, swallowing transport failures.
#[derive(Clone, Default)]
pub struct Notifier {
    port: Option<Arc<dyn ChangePort>>,
}

impl Notifier {
    pub fn new(port: Arc<dyn ChangePort>) -> Self {
        Self { port: Some(port) }
    }

    /// A notifier with no transport; every notify is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(&self, operation: Operation, data: Option<Value>) {
        let Some(port) = &self.port else {
            return;
        };
        let event = ChangeEvent::new(operation, data);
        match port.publish(&event) {
            Ok(()) => debug!(?operation, "change event published"),
            Err(e) => warn!(?operation, error = %e, "failed to broadcast change event"),
        }
    }
}
