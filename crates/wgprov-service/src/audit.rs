//! Audit Sink
//!
//! Narrow interface the provisioning flows report into. The service
//! records every allocation, reissue and reconciliation outcome, but
//! never depends on the sink's result - auditing must not be able to
//! fail a provisioning request.

use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// Receives audit events from the provisioning service
pub trait AuditSink: Send + Sync {
    /// Record one event. `user_id` is the owning local user, if any.
    fn record(&self, event_type: &str, details: Value, user_id: Option<i64>);
}

/// Sink that forwards events to the `audit` tracing target
#[derive(Debug, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event_type: &str, details: Value, user_id: Option<i64>) {
        info!(
            target: "audit",
            event_type,
            user_id,
            details = %details,
            "audit event"
        );
    }
}

/// One captured audit event
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: String,
    pub details: Value,
    pub user_id: Option<i64>,
}

/// In-memory sink for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event types recorded so far, in order
    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event_type: &str, details: Value, user_id: Option<i64>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AuditEvent {
                event_type: event_type.to_string(),
                details,
                user_id,
            });
    }
}
