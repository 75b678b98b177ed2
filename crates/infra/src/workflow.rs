//! Document workflow: numbering, filing and the credit reactions.
//!
//! Document mutations take the document's record lock. Reactions that touch
//! the credit ledger (opening a credit for an accepted credit note, reversing
//! applications of a cancelled invoice) run after that lock is released; the
//! ledger takes its own locks. Caps read from other documents (what is left
//! to credit on a referenced document, what an invoice still owes) are read
//! and acted on under that document's lock.
//!
//! Numbering, filing and status checks are written to the transaction log
//! whether they succeed or not.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use ecf_core::{AggregateId, DocumentId, Money, PartnerId, TenantId, UserId};
use ecf_credits::{
    ApplicationId, Credit, CreditApplication, CreditId, CreditStatus, InvoiceTarget,
};
use ecf_documents::{
    AssignNumber, CancelDocument, DocumentCommand, DocumentError, DocumentKind, DocumentReference,
    DocumentState, FiscalDocument, MarkSubmitted, RecordRegulatorStatus, RegisterDocument,
    RegulatorStatus,
};
use ecf_sequencing::{DocumentType, Encf, IssuingLocation};

use crate::allocator::{AllocationError, SequenceAllocator};
use crate::command_dispatcher::{DispatchError, Dispatcher};
use crate::event_store::EventStoreError;
use crate::external::{ServiceCall, SigningError, SigningService, Submission};
use crate::ledger::{CreditLedger, LedgerError};
use crate::locks::{LockBusy, LockKey, RecordLocks};
use crate::read_model::{InMemoryTenantStore, TenantStore, rebuild};
use crate::transaction_log::{
    FailureKind, OpenTransaction, Operation, Transaction, TransactionLog,
};

pub const DOCUMENT_AGGREGATE: &str = "documents.document";

pub type DocumentIndex = InMemoryTenantStore<DocumentId, FiscalDocument>;

fn blank(id: AggregateId) -> FiscalDocument {
    FiscalDocument::empty(DocumentId::from_uuid(*id.as_uuid()))
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error(transparent)]
    Document(DocumentError),

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("e-NCF {0} is already used by another document")]
    DuplicateEncf(Encf),

    #[error("document {0} is not a credit note accepted by the regulator")]
    NotAcceptedCreditNote(DocumentId),

    #[error("document {0} is not an open invoice")]
    NotAnInvoice(DocumentId),

    #[error(transparent)]
    Allocation(AllocationError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Signing(SigningError),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<LockBusy> for WorkflowError {
    fn from(value: LockBusy) -> Self {
        WorkflowError::ResourceBusy(value.to_string())
    }
}

impl From<DispatchError<DocumentError>> for WorkflowError {
    fn from(value: DispatchError<DocumentError>) -> Self {
        match value {
            DispatchError::Busy(msg) => WorkflowError::ResourceBusy(msg),
            DispatchError::Rejected(err) => WorkflowError::Document(err),
            other => WorkflowError::Infrastructure(other.to_string()),
        }
    }
}

impl From<AllocationError> for WorkflowError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::ResourceBusy(msg) => WorkflowError::ResourceBusy(msg),
            other => WorkflowError::Allocation(other),
        }
    }
}

impl From<LedgerError> for WorkflowError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::ResourceBusy(msg) => WorkflowError::ResourceBusy(msg),
            other => WorkflowError::Ledger(other),
        }
    }
}

impl From<SigningError> for WorkflowError {
    fn from(value: SigningError) -> Self {
        WorkflowError::Signing(value)
    }
}

impl From<EventStoreError> for WorkflowError {
    fn from(value: EventStoreError) -> Self {
        WorkflowError::Infrastructure(value.to_string())
    }
}

/// Caller input for a new document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub owner: PartnerId,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    /// Document modified by a credit or debit note.
    pub reference: Option<DocumentId>,
}

/// Outcome of one status poll run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct DocumentWorkflow {
    dispatcher: Arc<Dispatcher>,
    locks: Arc<RecordLocks>,
    index: Arc<DocumentIndex>,
    allocator: Arc<SequenceAllocator>,
    ledger: Arc<CreditLedger>,
    signer: Arc<dyn SigningService>,
    transactions: TransactionLog,
}

impl DocumentWorkflow {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        locks: Arc<RecordLocks>,
        allocator: Arc<SequenceAllocator>,
        ledger: Arc<CreditLedger>,
        signer: Arc<dyn SigningService>,
    ) -> Self {
        Self {
            dispatcher,
            locks,
            index: Arc::new(DocumentIndex::new()),
            allocator,
            ledger,
            signer,
            transactions: TransactionLog::new(),
        }
    }

    pub fn rebuild(&self) -> Result<usize, WorkflowError> {
        let restored = rebuild(
            self.dispatcher.store(),
            DOCUMENT_AGGREGATE,
            &*self.index,
            blank,
            |d| d.id_typed(),
        )?;
        info!(restored, "document index rebuilt");
        Ok(restored)
    }

    pub fn get(&self, tenant_id: TenantId, document_id: DocumentId) -> Option<FiscalDocument> {
        self.index.get(tenant_id, &document_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<FiscalDocument> {
        let mut documents = self.index.list(tenant_id);
        documents.sort_by_key(|d| d.registered_at());
        documents
    }

    /// Numbering and signing-service operations attempted for a document.
    pub fn transactions(&self, tenant_id: TenantId, document_id: DocumentId) -> Vec<Transaction> {
        self.transactions.for_document(tenant_id, document_id)
    }

    pub fn find_by_encf(&self, tenant_id: TenantId, encf: Encf) -> Option<FiscalDocument> {
        self.index
            .list(tenant_id)
            .into_iter()
            .find(|d| d.encf() == Some(encf))
    }

    /// What is left to credit on `reference` after its non-cancelled credit notes.
    pub fn creditable_remainder(&self, tenant_id: TenantId, reference: &FiscalDocument) -> Money {
        let credited = Money::saturating_sum(
            self.index
                .list(tenant_id)
                .iter()
                .filter(|d| d.kind() == DocumentKind::CreditNote && !d.is_cancelled())
                .filter(|d| d.reference() == Some(reference.id_typed()))
                .map(FiscalDocument::total),
        );
        reference
            .total()
            .checked_sub(credited)
            .unwrap_or(Money::ZERO)
    }

    #[instrument(
        skip(self, input),
        fields(tenant_id = %tenant_id, document_type = %input.document_type)
    )]
    pub fn register(
        &self,
        tenant_id: TenantId,
        input: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let _reference_guard = match input.reference {
            Some(reference_id) => {
                Some(self.locks.try_lock(LockKey::record(tenant_id, reference_id))?)
            }
            None => None,
        };
        let reference = match input.reference {
            Some(reference_id) => {
                let referenced = self
                    .get(tenant_id, reference_id)
                    .ok_or(WorkflowError::DocumentNotFound(reference_id))?;
                let creditable = (DocumentKind::of(input.document_type) == DocumentKind::CreditNote)
                    .then(|| self.creditable_remainder(tenant_id, &referenced));
                Some(DocumentReference {
                    document_id: reference_id,
                    creditable,
                })
            }
            None => None,
        };

        let document_id = DocumentId::new();
        let command = DocumentCommand::RegisterDocument(RegisterDocument {
            tenant_id,
            document_id,
            document_type: input.document_type,
            location: input.location,
            owner: input.owner,
            buyer_rnc: input.buyer_rnc,
            total: input.total,
            reference,
            occurred_at: now,
        });

        let document = self.run(tenant_id, document_id, &command)?;
        info!(document_id = %document_id, total = %document.total(), "document registered");
        Ok(document)
    }

    /// Give the document the next e-NCF of the active range for its type and
    /// location. A document is numbered at most once; the check happens
    /// before a number is drawn.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub fn assign_number(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let mut call = OpenTransaction::begin(document_id, Operation::GenerateEncf, now);
        let result = self.draw_number(tenant_id, document_id, as_of, now, &mut call);
        self.close(tenant_id, call, &result);
        result
    }

    fn draw_number(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
        call: &mut OpenTransaction,
    ) -> Result<FiscalDocument, WorkflowError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, document_id))?;

        let document = self.load(tenant_id, document_id)?;
        if document.is_cancelled() {
            return Err(WorkflowError::Document(DocumentError::Cancelled { document_id }));
        }
        if let Some(encf) = document.encf() {
            return Err(WorkflowError::Document(DocumentError::AlreadyNumbered {
                document_id,
                encf,
            }));
        }
        let location = document
            .location()
            .cloned()
            .ok_or(WorkflowError::DocumentNotFound(document_id))?;

        let allocation = self
            .allocator
            .allocate(tenant_id, document.document_type(), &location, as_of, now)?;
        call.encf(Some(allocation.encf));

        if let Some(other) = self.find_by_encf(tenant_id, allocation.encf) {
            warn!(
                encf = %allocation.encf,
                holder = %other.id_typed(),
                range_id = %allocation.range_id,
                "allocated e-NCF already belongs to another document"
            );
            return Err(WorkflowError::DuplicateEncf(allocation.encf));
        }

        let command = DocumentCommand::AssignNumber(AssignNumber {
            tenant_id,
            document_id,
            encf: allocation.encf,
            range_id: allocation.range_id,
            occurred_at: now,
        });
        let document = self.run(tenant_id, document_id, &command).inspect_err(|err| {
            warn!(
                encf = %allocation.encf,
                range_id = %allocation.range_id,
                error = %err,
                "e-NCF drawn but not recorded on the document"
            );
        })?;

        info!(encf = %allocation.encf, range_id = %allocation.range_id, "document numbered");
        Ok(document)
    }

    /// File a numbered document with the signing service.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub fn submit(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let mut call = OpenTransaction::begin(document_id, Operation::SendInvoice, now);
        let result = self.file(tenant_id, document_id, now, &mut call);
        self.close(tenant_id, call, &result);

        let document = result?;
        self.after_status(tenant_id, &document, now);
        Ok(document)
    }

    fn file(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        now: DateTime<Utc>,
        call: &mut OpenTransaction,
    ) -> Result<FiscalDocument, WorkflowError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, document_id))?;

        let document = self.load(tenant_id, document_id)?;
        call.encf(document.encf());
        let encf = document
            .encf()
            .ok_or(WorkflowError::Document(DocumentError::NotNumbered { document_id }))?;
        if document.state() != DocumentState::Numbered {
            return Err(WorkflowError::Document(DocumentError::InvalidState {
                document_id,
                state: document.state(),
                action: "submit",
            }));
        }

        let submission = Submission {
            tenant_id,
            document_id,
            document_type: document.document_type(),
            encf,
            buyer_rnc: document.buyer_rnc().map(str::to_string),
            total: document.total(),
            reference_encf: document
                .reference()
                .and_then(|r| self.get(tenant_id, r))
                .and_then(|r| r.encf()),
        };
        call.request(
            self.signer.route(ServiceCall::Submit),
            serde_json::to_value(&submission).ok(),
        );
        let receipt = self.signer.submit(&submission)?;
        call.response(
            receipt.reply.clone(),
            Some(&receipt.track_id),
            Some(receipt.status),
            receipt.messages.as_deref(),
        );

        let command = DocumentCommand::MarkSubmitted(MarkSubmitted {
            tenant_id,
            document_id,
            track_id: receipt.track_id.clone(),
            status: receipt.status,
            messages: receipt.messages,
            occurred_at: now,
        });
        let document = self.run(tenant_id, document_id, &command)?;
        info!(track_id = %receipt.track_id, status = ?receipt.status, "document submitted");
        Ok(document)
    }

    /// Record a regulator verdict. Unchanged verdicts append nothing.
    #[instrument(skip(self, messages), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub fn record_status(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        status: RegulatorStatus,
        messages: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let document = {
            let _guard = self.locks.try_lock(LockKey::record(tenant_id, document_id))?;
            let command = DocumentCommand::RecordRegulatorStatus(RecordRegulatorStatus {
                tenant_id,
                document_id,
                status,
                messages,
                occurred_at: now,
            });
            self.run(tenant_id, document_id, &command)?
        };

        self.after_status(tenant_id, &document, now);
        Ok(document)
    }

    /// Ask the signing service for the current verdict of a submitted document.
    /// An unrecognized code keeps the current status.
    pub fn refresh_status(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let mut call = OpenTransaction::begin(document_id, Operation::CheckStatus, now);
        let result = self.check_status(tenant_id, document_id, now, &mut call);
        self.close(tenant_id, call, &result);
        result
    }

    fn check_status(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        now: DateTime<Utc>,
        call: &mut OpenTransaction,
    ) -> Result<FiscalDocument, WorkflowError> {
        let document = self.load(tenant_id, document_id)?;
        call.encf(document.encf());
        let track_id = document
            .track_id()
            .ok_or(WorkflowError::Document(DocumentError::NotSubmitted { document_id }))?;

        call.request(self.signer.route(ServiceCall::Status { track_id }), None);
        let report = self.signer.status(track_id)?;
        call.response(
            report.reply.clone(),
            Some(track_id),
            report.status,
            report.messages.as_deref(),
        );
        if report.status.is_none() {
            call.warn("reply carries no recognizable status code; status kept");
        }
        let status = report.status.unwrap_or(match document.regulator_status() {
            RegulatorStatus::NotSent => RegulatorStatus::Pending,
            current => current,
        });
        self.record_status(tenant_id, document_id, status, report.messages, now)
    }

    /// Refresh up to `limit` documents still waiting for the regulator, oldest
    /// check first. A failing document is logged and skipped.
    #[instrument(skip(self))]
    pub fn poll_pending(&self, limit: usize, now: DateTime<Utc>) -> PollSummary {
        let mut waiting: Vec<FiscalDocument> = self
            .index
            .tenants()
            .into_iter()
            .flat_map(|tenant_id| self.index.list(tenant_id))
            .filter(FiscalDocument::awaiting_regulator)
            .collect();
        waiting.sort_by_key(|d| d.last_status_at());

        let mut summary = PollSummary::default();
        for document in waiting.into_iter().take(limit) {
            let Some(tenant_id) = document.tenant_id() else {
                continue;
            };
            summary.checked += 1;
            match self.refresh_status(tenant_id, document.id_typed(), now) {
                Ok(refreshed) => {
                    if refreshed.regulator_status() != document.regulator_status() {
                        summary.updated += 1;
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        tenant_id = %tenant_id,
                        document_id = %document.id_typed(),
                        track_id = ?document.track_id(),
                        error = %err,
                        "status refresh failed"
                    );
                }
            }
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                updated = summary.updated,
                failed = summary.failed,
                "regulator status poll finished"
            );
        }
        summary
    }

    /// Cancel a document, then undo what it did to the ledger.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        actor: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, WorkflowError> {
        let document = {
            let _guard = self.locks.try_lock(LockKey::record(tenant_id, document_id))?;
            let command = DocumentCommand::CancelDocument(CancelDocument {
                tenant_id,
                document_id,
                reason,
                occurred_at: now,
            });
            self.run(tenant_id, document_id, &command)?
        };
        info!(kind = ?document.kind(), "document cancelled");

        match document.kind() {
            DocumentKind::Invoice => {
                let reversed = self
                    .ledger
                    .reverse_invoice_applications(tenant_id, document_id, actor, now);
                if reversed > 0 {
                    info!(reversed, "credit applications of cancelled invoice reversed");
                }
            }
            DocumentKind::CreditNote => self.void_credit_of(tenant_id, document_id, actor, now),
            DocumentKind::DebitNote => {}
        }
        Ok(document)
    }

    /// Open (or return) the credit of an accepted credit note.
    pub fn open_credit_for(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<Credit, WorkflowError> {
        let document = self
            .get(tenant_id, document_id)
            .ok_or(WorkflowError::DocumentNotFound(document_id))?;

        let accepted = document.kind() == DocumentKind::CreditNote
            && !document.is_cancelled()
            && document.regulator_status() == RegulatorStatus::Accepted;
        let (Some(encf), Some(owner), true) = (document.encf(), document.owner(), accepted) else {
            return Err(WorkflowError::NotAcceptedCreditNote(document_id));
        };

        Ok(self
            .ledger
            .open_credit(tenant_id, document_id, encf, owner, document.total(), now)?)
    }

    /// Apply a credit to an invoice, capped at what the invoice still owes.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, credit_id = %credit_id, invoice_id = %invoice_id)
    )]
    pub fn apply_to_invoice(
        &self,
        tenant_id: TenantId,
        credit_id: CreditId,
        invoice_id: DocumentId,
        amount: Money,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditApplication, WorkflowError> {
        let _invoice_guard = self.locks.try_lock(LockKey::record(tenant_id, invoice_id))?;
        let invoice = self
            .get(tenant_id, invoice_id)
            .ok_or(WorkflowError::DocumentNotFound(invoice_id))?;
        let owner = match (invoice.kind(), invoice.is_cancelled(), invoice.owner()) {
            (DocumentKind::Invoice, false, Some(owner)) => owner,
            _ => return Err(WorkflowError::NotAnInvoice(invoice_id)),
        };

        let target = InvoiceTarget {
            invoice_id,
            owner,
            outstanding: Some(self.outstanding(tenant_id, &invoice)),
        };
        Ok(self.ledger.apply(tenant_id, credit_id, target, amount, actor, now)?)
    }

    pub fn reverse_application(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditApplication, WorkflowError> {
        Ok(self.ledger.reverse(tenant_id, application_id, actor, now)?)
    }

    /// Invoice total minus the credits currently applied to it.
    pub fn outstanding(&self, tenant_id: TenantId, invoice: &FiscalDocument) -> Money {
        let applied = Money::saturating_sum(
            self.ledger
                .applications_for_invoice(tenant_id, invoice.id_typed())
                .iter()
                .map(|a| a.amount),
        );
        invoice.total().checked_sub(applied).unwrap_or(Money::ZERO)
    }

    fn after_status(&self, tenant_id: TenantId, document: &FiscalDocument, now: DateTime<Utc>) {
        if document.kind() != DocumentKind::CreditNote
            || document.regulator_status() != RegulatorStatus::Accepted
        {
            return;
        }

        match self.open_credit_for(tenant_id, document.id_typed(), now) {
            Ok(credit) => {
                debug!(credit_id = %credit.id_typed(), "credit available for accepted credit note")
            }
            Err(err) => warn!(
                document_id = %document.id_typed(),
                encf = ?document.encf(),
                error = %err,
                "could not open credit for accepted credit note"
            ),
        }
    }

    fn void_credit_of(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        actor: UserId,
        now: DateTime<Utc>,
    ) {
        let Some(credit) = self.ledger.credit_for_source(tenant_id, document_id) else {
            return;
        };
        if credit.status() == CreditStatus::Void {
            return;
        }

        let credit_id = credit.id_typed();
        let result = self
            .ledger
            .applied_total(tenant_id, credit_id)
            .and_then(|applied| {
                if applied.is_zero() {
                    let reason = Some("credit note cancelled".to_string());
                    self.ledger
                        .void(tenant_id, credit_id, actor, reason, now)
                        .map(Some)
                } else {
                    Ok(None)
                }
            });

        match result {
            Ok(Some(_)) => info!(credit_id = %credit_id, "credit of cancelled credit note voided"),
            Ok(None) => warn!(
                credit_id = %credit_id,
                "credit note cancelled while its credit is applied; credit left open"
            ),
            Err(err) => warn!(
                credit_id = %credit_id,
                error = %err,
                "failed to void credit of cancelled credit note"
            ),
        }
    }

    fn close(
        &self,
        tenant_id: TenantId,
        mut call: OpenTransaction,
        result: &Result<FiscalDocument, WorkflowError>,
    ) {
        if let Err(err) = result {
            let (kind, http_status) = match err {
                WorkflowError::DocumentNotFound(_) => return,
                WorkflowError::Signing(SigningError::Http { status, .. }) => {
                    (FailureKind::ApiError, Some(*status))
                }
                WorkflowError::Signing(_) => (FailureKind::ApiError, None),
                _ => (FailureKind::ValidationError, None),
            };
            call.fail(kind, err.to_string(), http_status);
        }
        let record = self.transactions.finish(tenant_id, call);
        debug!(
            operation = ?record.operation,
            state = ?record.state,
            duration_ms = record.duration_ms,
            "transaction logged"
        );
    }

    fn load(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
    ) -> Result<FiscalDocument, WorkflowError> {
        let document = self
            .dispatcher
            .load(tenant_id, document_id.into(), blank)?;
        if !document.is_created() {
            return Err(WorkflowError::DocumentNotFound(document_id));
        }
        Ok(document)
    }

    fn run(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        command: &DocumentCommand,
    ) -> Result<FiscalDocument, WorkflowError> {
        let out = self
            .dispatcher
            .dispatch(tenant_id, document_id.into(), DOCUMENT_AGGREGATE, command, blank)
            .map_err(|err| match err {
                DispatchError::Rejected(DocumentError::NotFound) => {
                    WorkflowError::DocumentNotFound(document_id)
                }
                other => other.into(),
            })?;
        self.index.upsert(tenant_id, document_id, out.aggregate.clone());
        Ok(out.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use ecf_events::InMemoryEventBus;

    use crate::allocator::NewRange;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::external::InMemorySigningService;
    use crate::transaction_log::TransactionState;

    struct Fixture {
        workflow: DocumentWorkflow,
        allocator: Arc<SequenceAllocator>,
        ledger: Arc<CreditLedger>,
        signer: Arc<InMemorySigningService>,
        tenant_id: TenantId,
        customer: PartnerId,
        actor: UserId,
        location: IssuingLocation,
        today: NaiveDate,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
            let bus = Arc::new(InMemoryEventBus::new());
            let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
            let locks = Arc::new(RecordLocks::new());
            let allocator = Arc::new(SequenceAllocator::new(dispatcher.clone(), locks.clone()));
            let ledger = Arc::new(CreditLedger::new(dispatcher.clone(), locks.clone()));
            let signer = Arc::new(InMemorySigningService::new());
            let workflow = DocumentWorkflow::new(
                dispatcher,
                locks,
                allocator.clone(),
                ledger.clone(),
                signer.clone(),
            );

            let fixture = Self {
                workflow,
                allocator,
                ledger,
                signer,
                tenant_id: TenantId::new(),
                customer: PartnerId::new(),
                actor: UserId::new(),
                location: IssuingLocation::new("001", "001").unwrap(),
                today: Utc::now().date_naive(),
            };
            fixture.open_range(DocumentType::Consumer, 1, 100);
            fixture.open_range(DocumentType::CreditNote, 1, 100);
            fixture
        }

        fn open_range(&self, document_type: DocumentType, lower: u64, upper: u64) {
            let expires_on = document_type
                .ranges_expire()
                .then(|| self.today + Duration::days(365));
            let range = self
                .allocator
                .create(
                    self.tenant_id,
                    NewRange {
                        name: format!("{document_type} range"),
                        document_type,
                        location: self.location.clone(),
                        lower,
                        upper,
                        expires_on,
                    },
                    Utc::now(),
                )
                .unwrap();
            self.allocator
                .activate(self.tenant_id, range.id_typed(), self.today, Utc::now())
                .unwrap();
        }

        fn register(
            &self,
            document_type: DocumentType,
            total: i64,
            reference: Option<DocumentId>,
        ) -> FiscalDocument {
            self.try_register(document_type, total, reference).unwrap()
        }

        fn try_register(
            &self,
            document_type: DocumentType,
            total: i64,
            reference: Option<DocumentId>,
        ) -> Result<FiscalDocument, WorkflowError> {
            self.workflow.register(
                self.tenant_id,
                NewDocument {
                    document_type,
                    location: self.location.clone(),
                    owner: self.customer,
                    buyer_rnc: Some("131-00000-1".to_string()),
                    total: Money::from_minor(total),
                    reference,
                },
                Utc::now(),
            )
        }

        fn number(&self, document_id: DocumentId) -> Result<FiscalDocument, WorkflowError> {
            self.workflow
                .assign_number(self.tenant_id, document_id, self.today, Utc::now())
        }

        fn apply(
            &self,
            credit_id: CreditId,
            invoice_id: DocumentId,
            amount: i64,
        ) -> Result<CreditApplication, WorkflowError> {
            self.workflow.apply_to_invoice(
                self.tenant_id,
                credit_id,
                invoice_id,
                Money::from_minor(amount),
                self.actor,
                Utc::now(),
            )
        }

        fn accept(&self, document_id: DocumentId) -> FiscalDocument {
            self.number(document_id).unwrap();
            let submitted = self.workflow.submit(self.tenant_id, document_id, Utc::now()).unwrap();
            self.signer.set_code(submitted.track_id().unwrap(), 1);
            self.workflow
                .refresh_status(self.tenant_id, document_id, Utc::now())
                .unwrap()
        }
    }

    #[test]
    fn numbers_documents_in_range_order_exactly_once() {
        let f = Fixture::new();
        let first = f.register(DocumentType::Consumer, 10_000, None);
        let second = f.register(DocumentType::Consumer, 20_000, None);

        let first = f.number(first.id_typed()).unwrap();
        let second = f.number(second.id_typed()).unwrap();
        assert_eq!(first.encf().unwrap().to_string(), "E320000000001");
        assert_eq!(second.encf().unwrap().to_string(), "E320000000002");

        let again = f.number(first.id_typed()).unwrap_err();
        assert!(matches!(again, WorkflowError::Document(DocumentError::AlreadyNumbered { .. })));

        let third = f.register(DocumentType::Consumer, 5_000, None);
        let third = f.number(third.id_typed()).unwrap();
        assert_eq!(third.encf().unwrap().sequence(), 3);
    }

    #[test]
    fn numbering_without_active_range_is_rejected() {
        let f = Fixture::new();
        let doc = f
            .try_register(DocumentType::FiscalCredit, 10_000, None)
            .unwrap();
        let err = f.number(doc.id_typed()).unwrap_err();
        assert!(matches!(err, WorkflowError::Allocation(AllocationError::NoActiveRange { .. })));
    }

    #[test]
    fn numbering_a_locked_document_is_busy() {
        let f = Fixture::new();
        let doc = f.register(DocumentType::Consumer, 10_000, None);
        let _held = f
            .workflow
            .locks
            .try_lock(LockKey::record(f.tenant_id, doc.id_typed()))
            .unwrap();
        assert!(matches!(f.number(doc.id_typed()), Err(WorkflowError::ResourceBusy(_))));
    }

    #[test]
    fn submit_requires_a_number() {
        let f = Fixture::new();
        let doc = f.register(DocumentType::Consumer, 10_000, None);
        let err = f.workflow.submit(f.tenant_id, doc.id_typed(), Utc::now()).unwrap_err();
        assert!(matches!(err, WorkflowError::Document(DocumentError::NotNumbered { .. })));
        assert!(f.signer.submissions().is_empty());
    }

    #[test]
    fn accepted_credit_note_opens_a_credit_once() {
        let f = Fixture::new();
        let invoice = f.register(DocumentType::Consumer, 10_000, None);
        f.accept(invoice.id_typed());

        let note = f.register(DocumentType::CreditNote, 4_000, Some(invoice.id_typed()));
        let note = f.accept(note.id_typed());
        assert_eq!(note.regulator_status(), RegulatorStatus::Accepted);

        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();
        assert_eq!(credit.total(), Money::from_minor(4_000));
        assert_eq!(credit.owner(), Some(f.customer));
        assert_eq!(credit.source_encf(), note.encf());

        let reopened = f
            .workflow
            .open_credit_for(f.tenant_id, note.id_typed(), Utc::now())
            .unwrap();
        assert_eq!(reopened.id_typed(), credit.id_typed());
        assert_eq!(f.ledger.list(f.tenant_id).len(), 1);
    }

    #[test]
    fn credit_notes_cannot_exceed_what_is_left_to_credit() {
        let f = Fixture::new();
        let invoice = f.register(DocumentType::Consumer, 10_000, None);
        f.register(DocumentType::CreditNote, 7_000, Some(invoice.id_typed()));

        let err = f
            .try_register(DocumentType::CreditNote, 3_001, Some(invoice.id_typed()))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Document(DocumentError::ExceedsReferencedTotal { .. })
        ));
        f.register(DocumentType::CreditNote, 3_000, Some(invoice.id_typed()));
    }

    #[test]
    fn apply_is_capped_by_invoice_outstanding() {
        let f = Fixture::new();
        let base = f.register(DocumentType::Consumer, 50_000, None);
        let note = f.register(DocumentType::CreditNote, 50_000, Some(base.id_typed()));
        f.accept(note.id_typed());
        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();

        let invoice = f.register(DocumentType::Consumer, 30_000, None);
        f.apply(credit.id_typed(), invoice.id_typed(), 20_000).unwrap();

        let err = f.apply(credit.id_typed(), invoice.id_typed(), 10_001).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Ledger(LedgerError::Credit(
                ecf_credits::CreditError::ExceedsInvoiceBalance { .. }
            ))
        ));
        assert_eq!(f.workflow.outstanding(f.tenant_id, &invoice), Money::from_minor(10_000));
    }

    #[test]
    fn concurrent_applications_to_one_invoice_respect_what_it_owes() {
        let f = Fixture::new();
        let credits: Vec<CreditId> = (0..2)
            .map(|_| {
                let base = f.register(DocumentType::Consumer, 5_000, None);
                let note = f.register(DocumentType::CreditNote, 5_000, Some(base.id_typed()));
                f.accept(note.id_typed());
                f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap().id_typed()
            })
            .collect();

        for _ in 0..40 {
            let invoice = f.register(DocumentType::Consumer, 100, None);
            let invoice_id = invoice.id_typed();
            let barrier = std::sync::Barrier::new(credits.len());
            std::thread::scope(|scope| {
                for credit_id in &credits {
                    let barrier = &barrier;
                    let f = &f;
                    scope.spawn(move || {
                        barrier.wait();
                        let result = f.workflow.apply_to_invoice(
                            f.tenant_id,
                            *credit_id,
                            invoice_id,
                            Money::from_minor(100),
                            f.actor,
                            Utc::now(),
                        );
                        match result {
                            Ok(_) | Err(WorkflowError::ResourceBusy(_)) => {}
                            Err(WorkflowError::Ledger(LedgerError::Credit(
                                ecf_credits::CreditError::ExceedsInvoiceBalance { .. },
                            ))) => {}
                            Err(other) => panic!("unexpected workflow error: {other}"),
                        }
                    });
                }
            });

            let applied = Money::saturating_sum(
                f.ledger
                    .applications_for_invoice(f.tenant_id, invoice.id_typed())
                    .iter()
                    .map(|a| a.amount),
            );
            assert!(applied <= invoice.total(), "invoice over-applied: {applied}");
        }
    }

    #[test]
    fn caps_read_from_another_document_wait_for_its_lock() {
        let f = Fixture::new();
        let base = f.register(DocumentType::Consumer, 5_000, None);
        let note = f.register(DocumentType::CreditNote, 5_000, Some(base.id_typed()));
        f.accept(note.id_typed());
        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();
        let invoice = f.register(DocumentType::Consumer, 1_000, None);

        let held = f
            .workflow
            .locks
            .try_lock(LockKey::record(f.tenant_id, invoice.id_typed()))
            .unwrap();
        let err = f
            .workflow
            .apply_to_invoice(
                f.tenant_id,
                credit.id_typed(),
                invoice.id_typed(),
                Money::from_minor(500),
                f.actor,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ResourceBusy(_)));
        let err = f
            .try_register(DocumentType::CreditNote, 500, Some(invoice.id_typed()))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ResourceBusy(_)));
        drop(held);

        f.try_register(DocumentType::CreditNote, 500, Some(invoice.id_typed()))
            .unwrap();
    }

    #[test]
    fn concurrent_credit_notes_stay_within_the_referenced_total() {
        let f = Fixture::new();
        for _ in 0..20 {
            let invoice = f.register(DocumentType::Consumer, 10_000, None);
            let invoice_id = invoice.id_typed();
            let barrier = std::sync::Barrier::new(2);
            std::thread::scope(|scope| {
                for _ in 0..2 {
                    let barrier = &barrier;
                    let f = &f;
                    scope.spawn(move || {
                        barrier.wait();
                        match f.try_register(DocumentType::CreditNote, 6_000, Some(invoice_id)) {
                            Ok(_) | Err(WorkflowError::ResourceBusy(_)) => {}
                            Err(WorkflowError::Document(
                                DocumentError::ExceedsReferencedTotal { .. },
                            )) => {}
                            Err(other) => panic!("unexpected workflow error: {other}"),
                        }
                    });
                }
            });

            let remainder = f.workflow.creditable_remainder(f.tenant_id, &invoice);
            assert!(remainder >= Money::from_minor(4_000));
        }
    }

    #[test]
    fn signing_operations_are_logged_per_document() {
        let f = Fixture::new();
        let doc = f.register(DocumentType::Consumer, 1_000, None);
        let id = doc.id_typed();

        f.workflow.submit(f.tenant_id, id, Utc::now()).unwrap_err();
        let numbered = f.number(id).unwrap();

        f.signer.set_unreachable(true);
        f.workflow.submit(f.tenant_id, id, Utc::now()).unwrap_err();
        f.signer.set_unreachable(false);
        let submitted = f.workflow.submit(f.tenant_id, id, Utc::now()).unwrap();
        let track_id = submitted.track_id().unwrap().to_string();

        f.workflow.refresh_status(f.tenant_id, id, Utc::now()).unwrap();
        f.signer.set_code(&track_id, 1);
        f.workflow.refresh_status(f.tenant_id, id, Utc::now()).unwrap();

        let log = f.workflow.transactions(f.tenant_id, id);
        let summary: Vec<(Operation, TransactionState, Option<FailureKind>)> =
            log.iter().map(|t| (t.operation, t.state, t.failure)).collect();
        assert_eq!(
            summary,
            vec![
                (
                    Operation::SendInvoice,
                    TransactionState::Error,
                    Some(FailureKind::ValidationError)
                ),
                (Operation::GenerateEncf, TransactionState::Success, None),
                (Operation::SendInvoice, TransactionState::Error, Some(FailureKind::ApiError)),
                (Operation::SendInvoice, TransactionState::Success, None),
                (Operation::CheckStatus, TransactionState::Warning, None),
                (Operation::CheckStatus, TransactionState::Success, None),
            ]
        );

        assert_eq!(log[1].encf, numbered.encf());
        assert_eq!(log[2].request_url.as_deref(), Some("/invoice/send"));
        assert!(log[2].error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(log[3].request_method, Some("POST"));
        assert_eq!(log[3].track_id.as_deref(), Some(track_id.as_str()));
        assert_eq!(
            log[3].request_payload.as_ref().unwrap()["encf"],
            numbered.encf().unwrap().to_string()
        );
        assert_eq!(log[5].request_url, Some(format!("/invoice/status/{track_id}")));
        assert_eq!(log[5].regulator_status, Some(RegulatorStatus::Accepted));
        assert!(f.workflow.transactions(TenantId::new(), id).is_empty());
    }

    #[test]
    fn cancelling_an_invoice_reverses_its_applications() {
        let f = Fixture::new();
        let base = f.register(DocumentType::Consumer, 10_000, None);
        let note = f.register(DocumentType::CreditNote, 10_000, Some(base.id_typed()));
        f.accept(note.id_typed());
        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();

        let invoice = f.register(DocumentType::Consumer, 8_000, None);
        f.apply(credit.id_typed(), invoice.id_typed(), 6_000).unwrap();
        let available = f.ledger.get(f.tenant_id, credit.id_typed()).unwrap().available();
        assert_eq!(available, Money::from_minor(4_000));

        let reason = Some("wrong customer".into());
        f.workflow
            .cancel(f.tenant_id, invoice.id_typed(), f.actor, reason, Utc::now())
            .unwrap();

        let credit = f.ledger.get(f.tenant_id, credit.id_typed()).unwrap();
        assert_eq!(credit.available(), Money::from_minor(10_000));
        assert_eq!(credit.status(), CreditStatus::Available);
        assert!(f.ledger.applications_for_invoice(f.tenant_id, invoice.id_typed()).is_empty());
    }

    #[test]
    fn cancelling_a_credit_note_voids_an_unused_credit() {
        let f = Fixture::new();
        let base = f.register(DocumentType::Consumer, 10_000, None);
        let note = f.register(DocumentType::CreditNote, 2_500, Some(base.id_typed()));
        f.accept(note.id_typed());

        f.workflow
            .cancel(f.tenant_id, note.id_typed(), f.actor, None, Utc::now())
            .unwrap();

        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();
        assert_eq!(credit.status(), CreditStatus::Void);
    }

    #[test]
    fn cancelling_a_credit_note_keeps_an_applied_credit() {
        let f = Fixture::new();
        let base = f.register(DocumentType::Consumer, 10_000, None);
        let note = f.register(DocumentType::CreditNote, 2_500, Some(base.id_typed()));
        f.accept(note.id_typed());
        let credit = f.ledger.credit_for_source(f.tenant_id, note.id_typed()).unwrap();

        let invoice = f.register(DocumentType::Consumer, 1_000, None);
        f.apply(credit.id_typed(), invoice.id_typed(), 1_000).unwrap();

        f.workflow
            .cancel(f.tenant_id, note.id_typed(), f.actor, None, Utc::now())
            .unwrap();
        let credit = f.ledger.get(f.tenant_id, credit.id_typed()).unwrap();
        assert_eq!(credit.status(), CreditStatus::Partial);
    }

    #[test]
    fn poll_updates_pending_documents_and_skips_failures() {
        let f = Fixture::new();
        let ids: Vec<DocumentId> = (0..3)
            .map(|_| {
                let doc = f.register(DocumentType::Consumer, 1_000, None);
                f.number(doc.id_typed()).unwrap();
                f.workflow.submit(f.tenant_id, doc.id_typed(), Utc::now()).unwrap();
                doc.id_typed()
            })
            .collect();

        let track = |id: DocumentId| {
            let document = f.workflow.get(f.tenant_id, id).unwrap();
            document.track_id().unwrap().to_string()
        };
        f.signer.set_code(&track(ids[0]), 1);
        f.signer.set_code(&track(ids[1]), 2);

        let summary = f.workflow.poll_pending(50, Utc::now());
        assert_eq!(summary, PollSummary { checked: 3, updated: 2, failed: 0 });
        assert_eq!(
            f.workflow.get(f.tenant_id, ids[1]).unwrap().regulator_status(),
            RegulatorStatus::Rejected
        );
        assert_eq!(
            f.workflow.get(f.tenant_id, ids[2]).unwrap().regulator_status(),
            RegulatorStatus::Pending
        );

        f.signer.set_unreachable(true);
        let summary = f.workflow.poll_pending(50, Utc::now());
        assert_eq!(summary, PollSummary { checked: 1, updated: 0, failed: 1 });
    }

    #[test]
    fn index_rebuilds_from_the_store() {
        let f = Fixture::new();
        let doc = f.register(DocumentType::Consumer, 1_000, None);
        f.number(doc.id_typed()).unwrap();

        f.workflow.index.clear_tenant(f.tenant_id);
        assert!(f.workflow.get(f.tenant_id, doc.id_typed()).is_none());

        assert_eq!(f.workflow.rebuild().unwrap(), 1);
        let restored = f.workflow.get(f.tenant_id, doc.id_typed()).unwrap();
        assert_eq!(restored.state(), DocumentState::Numbered);
    }
}
