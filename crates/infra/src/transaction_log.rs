//! Per-document log of numbering and signing-service operations.
//!
//! The audit trail shows what changed; this log shows what was attempted,
//! including calls that failed before anything could change. Records are
//! kept in memory and are not rebuilt on restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use ecf_core::{DocumentId, TenantId};
use ecf_documents::RegulatorStatus;
use ecf_sequencing::Encf;

use crate::external::ServiceRoute;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GenerateEncf,
    SendInvoice,
    CheckStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Success,
    /// The call went through but its answer could not be acted on.
    Warning,
    Error,
}

/// Why a failed operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The signing service was unreachable or refused the call.
    ApiError,
    /// Refused locally before (or instead of) calling out.
    ValidationError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Position in the log; later records have higher numbers.
    pub sequence: u64,
    pub document_id: DocumentId,
    pub operation: Operation,
    pub state: TransactionState,
    pub encf: Option<Encf>,
    pub request_method: Option<&'static str>,
    pub request_url: Option<String>,
    pub request_payload: Option<JsonValue>,
    pub response_status: Option<u16>,
    pub response_body: Option<JsonValue>,
    pub track_id: Option<String>,
    pub regulator_status: Option<RegulatorStatus>,
    pub messages: Option<String>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// A transaction being recorded; [`TransactionLog::finish`] stamps its
/// duration and stores it.
#[derive(Debug)]
pub struct OpenTransaction {
    record: Transaction,
    started: Instant,
}

impl OpenTransaction {
    pub fn begin(document_id: DocumentId, operation: Operation, now: DateTime<Utc>) -> Self {
        Self {
            record: Transaction {
                id: Uuid::now_v7(),
                sequence: 0,
                document_id,
                operation,
                state: TransactionState::Success,
                encf: None,
                request_method: None,
                request_url: None,
                request_payload: None,
                response_status: None,
                response_body: None,
                track_id: None,
                regulator_status: None,
                messages: None,
                failure: None,
                error: None,
                duration_ms: 0,
                recorded_at: now,
            },
            started: Instant::now(),
        }
    }

    pub fn encf(&mut self, encf: Option<Encf>) {
        self.record.encf = encf;
    }

    pub fn request(&mut self, route: ServiceRoute, payload: Option<JsonValue>) {
        self.record.request_method = Some(route.method);
        self.record.request_url = Some(route.url);
        self.record.request_payload = payload;
    }

    pub fn response(
        &mut self,
        body: JsonValue,
        track_id: Option<&str>,
        status: Option<RegulatorStatus>,
        messages: Option<&str>,
    ) {
        self.record.response_body = Some(body);
        self.record.track_id = track_id.map(str::to_string);
        self.record.regulator_status = status;
        self.record.messages = messages.map(str::to_string);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record.state = TransactionState::Warning;
        self.record.error = Some(message.into());
    }

    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        http_status: Option<u16>,
    ) {
        self.record.state = TransactionState::Error;
        self.record.failure = Some(kind);
        self.record.error = Some(message.into());
        self.record.response_status = http_status;
    }
}

#[derive(Debug, Default)]
pub struct TransactionLog {
    records: InMemoryTenantStore<Uuid, Transaction>,
    next_sequence: AtomicU64,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(&self, tenant_id: TenantId, open: OpenTransaction) -> Transaction {
        let OpenTransaction { mut record, started } = open;
        record.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.records.upsert(tenant_id, record.id, record.clone());
        record
    }

    /// Everything attempted for one document, oldest first.
    pub fn for_document(&self, tenant_id: TenantId, document_id: DocumentId) -> Vec<Transaction> {
        let mut records: Vec<Transaction> = self
            .records
            .list(tenant_id)
            .into_iter()
            .filter(|t| t.document_id == document_id)
            .collect();
        records.sort_by_key(|t| t.sequence);
        records
    }
}
