//! Audit trail emission.
//!
//! Engines report each step as an [`AuditEvent`] to an optional
//! [`AuditSink`]. Sinks only observe: a run produces the same result with
//! or without one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

/// A single audit record emitted by a pattern run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: String,
    /// Run that produced the event.
    pub run_id: String,
    /// Event name, e.g. `tot.expand`.
    pub event: String,
    /// Structured attributes.
    pub attributes: serde_json::Value,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create a new event for the given run
    pub fn new(
        run_id: impl Into<String>,
        event: impl Into<String>,
        attributes: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            event: event.into(),
            attributes,
            created_at: Utc::now(),
        }
    }

    /// Mark as successful with latency
    pub fn success(mut self, latency_ms: i64) -> Self {
        self.set_attribute("success", serde_json::json!(true));
        self.set_attribute("latency_ms", serde_json::json!(latency_ms));
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.set_attribute("success", serde_json::json!(false));
        self.set_attribute("error", serde_json::json!(error.into()));
        self.set_attribute("latency_ms", serde_json::json!(latency_ms));
        self
    }

    fn set_attribute(&mut self, key: &str, value: serde_json::Value) {
        if !self.attributes.is_object() {
            self.attributes = serde_json::json!({ "value": self.attributes.take() });
        }
        if let Some(map) = self.attributes.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}

/// Receiver for audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event. Must not fail the run.
    fn record(&self, event: &AuditEvent);
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            target: "consult_patterns::audit",
            run_id = %event.run_id,
            event = %event.event,
            attributes = %event.attributes,
            "audit"
        );
    }
}

/// Sink that keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of recorded events, in order
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
