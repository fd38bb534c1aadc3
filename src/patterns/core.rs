//! Core infrastructure shared by all pattern engines.
//!
//! [`PatternCore`] centralizes the model invoker and the optional audit sink
//! so each engine composes it instead of duplicating the fields.

use std::sync::Arc;
use tracing::debug;

use super::PatternKind;
use crate::audit::{AuditEvent, AuditSink};
use crate::invoker::ModelInvoker;

/// Core infrastructure shared by all pattern engines.
#[derive(Clone)]
pub struct PatternCore {
    /// Model invoker for LLM-powered steps.
    invoker: Arc<dyn ModelInvoker>,
    /// Optional audit sink.
    sink: Option<Arc<dyn AuditSink>>,
    /// Pattern owning this core; prefixes event names.
    kind: PatternKind,
}

impl PatternCore {
    /// Create a new core for the given pattern.
    pub fn new(invoker: Arc<dyn ModelInvoker>, kind: PatternKind) -> Self {
        Self {
            invoker,
            sink: None,
            kind,
        }
    }

    /// Attach an audit sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Get a reference to the model invoker.
    #[inline]
    pub fn invoker(&self) -> &dyn ModelInvoker {
        self.invoker.as_ref()
    }

    /// The pattern this core serves.
    #[inline]
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Start an audit event named `<pattern>.<step>`.
    pub fn event(
        &self,
        run_id: &str,
        step: &str,
        attributes: serde_json::Value,
    ) -> AuditEvent {
        AuditEvent::new(run_id, format!("{}.{}", self.kind, step), attributes)
    }

    /// Deliver an event to the sink, if any.
    pub fn emit(&self, event: AuditEvent) {
        debug!(run_id = %event.run_id, event = %event.event, "Audit event");
        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::invoker::MockModelInvoker;

    #[test]
    fn test_pattern_core_is_clone_send_sync() {
        fn assert_traits<T: Clone + Send + Sync>() {}
        assert_traits::<PatternCore>();
    }

    #[test]
    fn test_event_name_is_prefixed_with_pattern() {
        let core = PatternCore::new(Arc::new(MockModelInvoker::new()), PatternKind::Tot);
        let event = core.event("run-1", "expand", serde_json::json!({}));
        assert_eq!(event.event, "tot.expand");
        assert_eq!(event.run_id, "run-1");
        assert_eq!(core.kind(), PatternKind::Tot);
    }

    #[test]
    fn test_emit_without_sink_is_noop() {
        let core = PatternCore::new(
            Arc::new(MockModelInvoker::new()),
            PatternKind::Constitutional,
        );
        core.emit(core.event("run-1", "review", serde_json::json!({})));
    }

    #[test]
    fn test_emit_records_to_sink() {
        let sink = Arc::new(MemorySink::new());
        let core = PatternCore::new(
            Arc::new(MockModelInvoker::new()),
            PatternKind::Constitutional,
        )
        .with_sink(sink.clone());

        core.emit(core.event("run-1", "review", serde_json::json!({})));
        core.emit(core.event("run-1", "revise", serde_json::json!({})));

        assert_eq!(
            sink.event_names(),
            vec!["constitutional.review", "constitutional.revise"]
        );
    }
}
