use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use ecf_core::{AggregateId, TenantId};
use ecf_events::EventEnvelope;

use crate::read_model::{InMemoryTenantStore, TenantStore};

/// One committed change, as shown in a record's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub sequence_number: u64,
    pub payload: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

/// Per-record change history fed from the event bus.
///
/// Keyed by event id, so redelivered envelopes are absorbed.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: InMemoryTenantStore<Uuid, AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, envelope: &EventEnvelope<JsonValue>) {
        let tenant_id = envelope.tenant_id();
        if self.entries.get(tenant_id, &envelope.event_id()).is_some() {
            return;
        }
        self.entries.upsert(
            tenant_id,
            envelope.event_id(),
            AuditEntry {
                event_id: envelope.event_id(),
                aggregate_id: envelope.aggregate_id(),
                aggregate_type: envelope.aggregate_type().to_string(),
                event_type: envelope.event_type().to_string(),
                sequence_number: envelope.sequence_number(),
                payload: envelope.payload().clone(),
                recorded_at: envelope.occurred_at(),
            },
        );
    }

    /// History of one record, oldest first.
    pub fn for_aggregate(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .list(tenant_id)
            .into_iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .collect();
        entries.sort_by_key(|e| e.sequence_number);
        entries
    }
}
