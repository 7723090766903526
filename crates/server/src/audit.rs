use clearance_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards audit events to the log stream. Rejected and failed outcomes are
/// logged at `warn`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let request_id = event.request_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = "audit.event",
                audit_event_type = %event.event_type,
                audit_category = ?event.category,
                correlation_id = %event.correlation_id,
                request_id = %request_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event recorded"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = "audit.event",
                audit_event_type = %event.event_type,
                audit_category = ?event.category,
                audit_outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                request_id = %request_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event recorded"
            ),
        }
    }
}
