//! Request/response bodies. Amounts are decimal strings (`"125.00"`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ecf_core::{DocumentId, Money, PartnerId, UserId};
use ecf_credits::{ApplicationId, Credit, CreditApplication, CreditId, CreditStatus};
use ecf_documents::{DocumentKind, DocumentState, FiscalDocument, RegulatorStatus};
use ecf_infra::allocator::Allocation;
use ecf_infra::read_model::AuditEntry;
use ecf_infra::transaction_log::Transaction;
use ecf_sequencing::{DocumentType, RangeId, RangeStatus, SequenceRange};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRangeRequest {
    pub name: String,
    pub document_type: DocumentType,
    pub establishment: String,
    pub emission_point: String,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ReviseRangeRequest {
    pub name: String,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpireRangesRequest {
    /// Defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct OpenCreditRequest {
    /// Accepted credit note the credit comes from.
    pub document_id: DocumentId,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCreditRequest {
    pub invoice_id: DocumentId,
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDocumentRequest {
    pub document_type: DocumentType,
    pub establishment: String,
    pub emission_point: String,
    pub owner: PartnerId,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    pub reference: Option<DocumentId>,
}

#[derive(Debug, Deserialize)]
pub struct RecordStatusRequest {
    pub status: RegulatorStatus,
    pub messages: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct RangeView {
    pub id: RangeId,
    pub name: String,
    pub document_type: DocumentType,
    pub establishment: Option<String>,
    pub emission_point: Option<String>,
    pub lower: u64,
    pub upper: u64,
    pub cursor: u64,
    pub status: RangeStatus,
    pub expires_on: Option<NaiveDate>,
    pub issued: u64,
    pub remaining: u64,
    pub percent_used: f64,
    pub days_to_expiry: Option<i64>,
}

impl RangeView {
    pub fn new(range: &SequenceRange, today: NaiveDate) -> Self {
        Self {
            id: range.id_typed(),
            name: range.name().to_string(),
            document_type: range.document_type(),
            establishment: range.location().map(|l| l.establishment().to_string()),
            emission_point: range.location().map(|l| l.emission_point().to_string()),
            lower: range.lower(),
            upper: range.upper(),
            cursor: range.cursor(),
            status: range.status(),
            expires_on: range.expires_on(),
            issued: range.issued(),
            remaining: range.remaining(),
            percent_used: range.percent_used(),
            days_to_expiry: range.days_to_expiry(today),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllocationView {
    pub range_id: RangeId,
    pub number: u64,
    pub encf: String,
    pub exhausted: bool,
}

impl From<Allocation> for AllocationView {
    fn from(a: Allocation) -> Self {
        Self {
            range_id: a.range_id,
            number: a.number,
            encf: a.encf.to_string(),
            exhausted: a.exhausted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreditView {
    pub id: CreditId,
    pub source_document: Option<DocumentId>,
    pub source_encf: Option<String>,
    pub owner: Option<PartnerId>,
    pub total: Money,
    pub available: Money,
    pub applied_total: Money,
    pub status: CreditStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub applications: Vec<ApplicationView>,
}

impl From<&Credit> for CreditView {
    fn from(c: &Credit) -> Self {
        Self {
            id: c.id_typed(),
            source_document: c.source_document(),
            source_encf: c.source_encf().map(|e| e.to_string()),
            owner: c.owner(),
            total: c.total(),
            available: c.available(),
            applied_total: c.applied_total(),
            status: c.status(),
            created_at: c.created_at(),
            applications: c.applications().iter().map(ApplicationView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApplicationView {
    pub id: ApplicationId,
    pub credit_id: CreditId,
    pub invoice_id: DocumentId,
    pub amount: Money,
    pub status: ecf_credits::ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub applied_by: UserId,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<UserId>,
}

impl From<&CreditApplication> for ApplicationView {
    fn from(a: &CreditApplication) -> Self {
        Self {
            id: a.id,
            credit_id: a.credit_id,
            invoice_id: a.invoice_id,
            amount: a.amount,
            status: a.status,
            applied_at: a.applied_at,
            applied_by: a.applied_by,
            reversed_at: a.reversed_at,
            reversed_by: a.reversed_by,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: DocumentId,
    pub document_type: DocumentType,
    pub kind: DocumentKind,
    pub state: DocumentState,
    pub establishment: Option<String>,
    pub emission_point: Option<String>,
    pub owner: Option<PartnerId>,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    pub reference: Option<DocumentId>,
    pub encf: Option<String>,
    pub range_id: Option<RangeId>,
    pub track_id: Option<String>,
    pub regulator_status: RegulatorStatus,
    pub regulator_messages: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_status_at: Option<DateTime<Utc>>,
}

impl From<&FiscalDocument> for DocumentView {
    fn from(d: &FiscalDocument) -> Self {
        Self {
            id: d.id_typed(),
            document_type: d.document_type(),
            kind: d.kind(),
            state: d.state(),
            establishment: d.location().map(|l| l.establishment().to_string()),
            emission_point: d.location().map(|l| l.emission_point().to_string()),
            owner: d.owner(),
            buyer_rnc: d.buyer_rnc().map(str::to_string),
            total: d.total(),
            reference: d.reference(),
            encf: d.encf().map(|e| e.to_string()),
            range_id: d.numbered_from(),
            track_id: d.track_id().map(str::to_string),
            regulator_status: d.regulator_status(),
            regulator_messages: d.regulator_messages().map(str::to_string),
            registered_at: d.registered_at(),
            last_status_at: d.last_status_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub aggregate_id: String,
    pub entries: Vec<AuditEntry>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsView {
    pub document_id: DocumentId,
    pub transactions: Vec<Transaction>,
}
