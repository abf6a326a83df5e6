//! Audit trail for migration flag changes.
//!
//! Every transition emits one record per changed field, both to the
//! structured log (target `"audit"`) and to a broadcast channel any number
//! of subscribers can observe. Subscribers that fall behind lose the oldest
//! records rather than blocking writers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::constants;

/// One observed flag change.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Which stored field changed.
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    /// Operator-supplied reason for the transition.
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Publisher of audit records.
#[derive(Clone)]
pub struct AuditLog {
    tx: broadcast::Sender<AuditRecord>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(constants::AUDIT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Observe future audit records.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.tx.subscribe()
    }

    /// Record one field change.
    pub fn record(
        &self,
        field: &str,
        old_value: impl std::fmt::Display,
        new_value: impl std::fmt::Display,
        reason: &str,
    ) {
        let record = AuditRecord {
            field: field.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        info!(
            target: "audit",
            field = %record.field,
            old_value = %record.old_value,
            new_value = %record.new_value,
            reason = %record.reason,
            "migration flag changed"
        );
        // No subscribers is fine; the log line above is the durable trace.
        let _ = self.tx.send(record);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
