//! Credit ledger: apply, reverse and void credit balances.
//!
//! Each mutation takes the credit's record lock without waiting, then runs
//! against the live credit stream. Applications live inside their credit, so
//! a reversal restores the application and the balance in one append.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use ecf_core::{AggregateId, DocumentId, Money, PartnerId, TenantId, UserId};
use ecf_credits::{
    ApplicationId, ApplyCredit, Credit, CreditApplication, CreditCommand, CreditError, CreditId,
    CreditStatus, InvoiceTarget, OpenCredit, ReverseApplication, VoidCredit,
};
use ecf_sequencing::Encf;

use crate::command_dispatcher::{DispatchError, Dispatcher};
use crate::event_store::EventStoreError;
use crate::locks::{LockBusy, LockKey, RecordLocks};
use crate::read_model::{InMemoryTenantStore, TenantStore, rebuild};

pub const CREDIT_AGGREGATE: &str = "credits.credit";

pub type CreditIndex = InMemoryTenantStore<CreditId, Credit>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error(transparent)]
    Credit(CreditError),

    #[error("credit {0} not found")]
    CreditNotFound(CreditId),

    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<LockBusy> for LedgerError {
    fn from(value: LockBusy) -> Self {
        LedgerError::ResourceBusy(value.to_string())
    }
}

impl From<DispatchError<CreditError>> for LedgerError {
    fn from(value: DispatchError<CreditError>) -> Self {
        match value {
            DispatchError::Busy(msg) => LedgerError::ResourceBusy(msg),
            DispatchError::Rejected(err) => LedgerError::Credit(err),
            other => LedgerError::Infrastructure(other.to_string()),
        }
    }
}

impl From<EventStoreError> for LedgerError {
    fn from(value: EventStoreError) -> Self {
        LedgerError::Infrastructure(value.to_string())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ReconcileError(pub String);

/// Matches the accounting lines of an invoice and the credit note that paid
/// it. Runs after an application is committed; failure never undoes it.
pub trait Reconciler: Send + Sync {
    fn reconcile(
        &self,
        credit: &Credit,
        application: &CreditApplication,
    ) -> Result<(), ReconcileError>;
}

/// Reconciler for deployments without an accounting integration.
#[derive(Debug, Default)]
pub struct NoopReconciler;

impl Reconciler for NoopReconciler {
    fn reconcile(
        &self,
        _credit: &Credit,
        _application: &CreditApplication,
    ) -> Result<(), ReconcileError> {
        Ok(())
    }
}

pub struct CreditLedger {
    dispatcher: Arc<Dispatcher>,
    locks: Arc<RecordLocks>,
    index: Arc<CreditIndex>,
    reconciler: Arc<dyn Reconciler>,
}

impl CreditLedger {
    pub fn new(dispatcher: Arc<Dispatcher>, locks: Arc<RecordLocks>) -> Self {
        Self::with_reconciler(dispatcher, locks, Arc::new(NoopReconciler))
    }

    pub fn with_reconciler(
        dispatcher: Arc<Dispatcher>,
        locks: Arc<RecordLocks>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            dispatcher,
            locks,
            index: Arc::new(CreditIndex::new()),
            reconciler,
        }
    }

    pub fn rebuild(&self) -> Result<usize, LedgerError> {
        let restored = rebuild(
            self.dispatcher.store(),
            CREDIT_AGGREGATE,
            &*self.index,
            |id| Credit::empty(CreditId::new(id)),
            |c| c.id_typed(),
        )?;
        info!(restored, "credit index rebuilt");
        Ok(restored)
    }

    pub fn get(&self, tenant_id: TenantId, credit_id: CreditId) -> Option<Credit> {
        self.index.get(tenant_id, &credit_id)
    }

    /// Credits of a tenant, newest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<Credit> {
        let mut credits = self.index.list(tenant_id);
        credits.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        credits
    }

    /// Credits of `owner` that still have balance to apply.
    pub fn credits_for_owner(&self, tenant_id: TenantId, owner: PartnerId) -> Vec<Credit> {
        self.list(tenant_id)
            .into_iter()
            .filter(|c| c.owner() == Some(owner))
            .filter(|c| matches!(c.status(), CreditStatus::Available | CreditStatus::Partial))
            .collect()
    }

    /// The credit opened from a credit-note document, if any.
    pub fn credit_for_source(
        &self,
        tenant_id: TenantId,
        source_document: DocumentId,
    ) -> Option<Credit> {
        self.index
            .list(tenant_id)
            .into_iter()
            .find(|c| c.source_document() == Some(source_document))
    }

    /// Sum of non-reversed applications, computed from the live credit.
    pub fn applied_total(
        &self,
        tenant_id: TenantId,
        credit_id: CreditId,
    ) -> Result<Money, LedgerError> {
        Ok(self.load(tenant_id, credit_id)?.applied_total())
    }

    /// Non-reversed applications paying `invoice_id`, across all credits.
    pub fn applications_for_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: DocumentId,
    ) -> Vec<CreditApplication> {
        let mut applications: Vec<CreditApplication> = self
            .index
            .list(tenant_id)
            .iter()
            .flat_map(|c| c.applied_to(invoice_id).cloned().collect::<Vec<_>>())
            .collect();
        applications.sort_by_key(|a| a.applied_at);
        applications
    }

    pub fn find_application(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
    ) -> Option<CreditApplication> {
        self.index
            .list(tenant_id)
            .iter()
            .find_map(|c| c.application(application_id).cloned())
    }

    /// Open the credit for an accepted credit note. Returns the existing
    /// credit when one was already opened from the same document.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, source_document = %source_document))]
    pub fn open_credit(
        &self,
        tenant_id: TenantId,
        source_document: DocumentId,
        source_encf: Encf,
        owner: PartnerId,
        total: Money,
        now: DateTime<Utc>,
    ) -> Result<Credit, LedgerError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, source_document))?;
        if let Some(existing) = self.credit_for_source(tenant_id, source_document) {
            return Ok(existing);
        }

        let credit_id = CreditId::new(AggregateId::new());
        let command = CreditCommand::OpenCredit(OpenCredit {
            tenant_id,
            credit_id,
            source_document,
            source_encf,
            owner,
            total,
            occurred_at: now,
        });
        let credit = self.run(tenant_id, credit_id, &command)?;
        info!(credit_id = %credit_id, encf = %source_encf, total = %total, "credit opened");
        Ok(credit)
    }

    /// Deduct `amount` from the credit for `invoice`.
    #[instrument(
        skip(self, invoice),
        fields(
            tenant_id = %tenant_id,
            credit_id = %credit_id,
            invoice_id = %invoice.invoice_id,
            amount = %amount
        )
    )]
    pub fn apply(
        &self,
        tenant_id: TenantId,
        credit_id: CreditId,
        invoice: InvoiceTarget,
        amount: Money,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditApplication, LedgerError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, credit_id.0))?;

        let application_id = ApplicationId::new();
        let command = CreditCommand::ApplyCredit(ApplyCredit {
            tenant_id,
            credit_id,
            application_id,
            invoice,
            amount,
            actor,
            occurred_at: now,
        });
        let credit = self.run(tenant_id, credit_id, &command)?;
        let application = credit
            .application(application_id)
            .cloned()
            .ok_or(LedgerError::ApplicationNotFound(application_id))?;

        info!(
            application_id = %application_id,
            available = %credit.available(),
            status = %credit.status(),
            "credit applied"
        );

        if let Err(err) = self.reconciler.reconcile(&credit, &application) {
            warn!(
                credit_id = %credit_id,
                source_document = ?credit.source_document(),
                invoice_id = %application.invoice_id,
                amount = %application.amount,
                error = %err,
                "ledger reconciliation failed; application kept"
            );
        }

        Ok(application)
    }

    /// Undo an application, restoring the credit balance.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, application_id = %application_id))]
    pub fn reverse(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditApplication, LedgerError> {
        let credit_id = self
            .find_application(tenant_id, application_id)
            .map(|a| a.credit_id)
            .ok_or(LedgerError::ApplicationNotFound(application_id))?;

        let _guard = self.locks.try_lock(LockKey::record(tenant_id, credit_id.0))?;

        let command = CreditCommand::ReverseApplication(ReverseApplication {
            tenant_id,
            credit_id,
            application_id,
            actor,
            occurred_at: now,
        });
        let credit = self.run(tenant_id, credit_id, &command)?;
        let application = credit
            .application(application_id)
            .cloned()
            .ok_or(LedgerError::ApplicationNotFound(application_id))?;

        info!(
            credit_id = %credit_id,
            available = %credit.available(),
            status = %credit.status(),
            "application reversed"
        );
        Ok(application)
    }

    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, credit_id = %credit_id))]
    pub fn void(
        &self,
        tenant_id: TenantId,
        credit_id: CreditId,
        actor: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Credit, LedgerError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, credit_id.0))?;
        let command = CreditCommand::VoidCredit(VoidCredit {
            tenant_id,
            credit_id,
            actor,
            reason,
            occurred_at: now,
        });
        let credit = self.run(tenant_id, credit_id, &command)?;
        info!(credit_id = %credit_id, "credit voided");
        Ok(credit)
    }

    /// Reverse every applied application paying `invoice_id`.
    ///
    /// Each failure is logged and the rest are still processed. Returns the
    /// number reversed.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub fn reverse_invoice_applications(
        &self,
        tenant_id: TenantId,
        invoice_id: DocumentId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> usize {
        let mut reversed = 0;
        for application in self.applications_for_invoice(tenant_id, invoice_id) {
            match self.reverse(tenant_id, application.id, actor, now) {
                Ok(_) => reversed += 1,
                Err(err) => warn!(
                    application_id = %application.id,
                    credit_id = %application.credit_id,
                    amount = %application.amount,
                    error = %err,
                    "failed to reverse credit application of cancelled invoice"
                ),
            }
        }
        reversed
    }

    fn load(&self, tenant_id: TenantId, credit_id: CreditId) -> Result<Credit, LedgerError> {
        let credit = self
            .dispatcher
            .load(tenant_id, credit_id.0, |id| Credit::empty(CreditId::new(id)))?;
        if !credit.is_created() {
            return Err(LedgerError::CreditNotFound(credit_id));
        }
        Ok(credit)
    }

    fn run(
        &self,
        tenant_id: TenantId,
        credit_id: CreditId,
        command: &CreditCommand,
    ) -> Result<Credit, LedgerError> {
        let out = self
            .dispatcher
            .dispatch(tenant_id, credit_id.0, CREDIT_AGGREGATE, command, |id| {
                Credit::empty(CreditId::new(id))
            })
            .map_err(|err| match err {
                DispatchError::Rejected(CreditError::NotFound) => {
                    LedgerError::CreditNotFound(credit_id)
                }
                other => other.into(),
            })?;
        self.index.upsert(tenant_id, credit_id, out.aggregate.clone());
        Ok(out.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use ecf_credits::ApplicationStatus;
    use ecf_events::InMemoryEventBus;
    use ecf_sequencing::DocumentType;
    use proptest::prelude::*;

    fn dispatcher() -> Arc<Dispatcher> {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        Arc::new(CommandDispatcher::new(store, Arc::new(InMemoryEventBus::new())))
    }

    struct Fixture {
        ledger: CreditLedger,
        tenant_id: TenantId,
        owner: PartnerId,
        actor: UserId,
        credit_id: CreditId,
    }

    impl Fixture {
        fn new(total: i64) -> Self {
            Self::with_ledger(CreditLedger::new(dispatcher(), Arc::new(RecordLocks::new())), total)
        }

        fn with_ledger(ledger: CreditLedger, total: i64) -> Self {
            let tenant_id = TenantId::new();
            let owner = PartnerId::new();
            let credit = ledger
                .open_credit(
                    tenant_id,
                    DocumentId::new(),
                    Encf::compose(DocumentType::CreditNote, 1).unwrap(),
                    owner,
                    Money::from_minor(total),
                    Utc::now(),
                )
                .unwrap();
            Self {
                ledger,
                tenant_id,
                owner,
                actor: UserId::new(),
                credit_id: credit.id_typed(),
            }
        }

        fn invoice(&self) -> InvoiceTarget {
            InvoiceTarget {
                invoice_id: DocumentId::new(),
                owner: self.owner,
                outstanding: None,
            }
        }

        fn apply(
            &self,
            invoice: InvoiceTarget,
            amount: i64,
        ) -> Result<CreditApplication, LedgerError> {
            self.ledger.apply(
                self.tenant_id,
                self.credit_id,
                invoice,
                Money::from_minor(amount),
                self.actor,
                Utc::now(),
            )
        }

        fn credit(&self) -> Credit {
            self.ledger.get(self.tenant_id, self.credit_id).unwrap()
        }
    }

    #[test]
    fn apply_apply_reverse_scenario() {
        let f = Fixture::new(1000);

        f.apply(f.invoice(), 400).unwrap();
        assert_eq!(f.credit().available(), Money::from_minor(600));
        assert_eq!(f.credit().status(), CreditStatus::Partial);

        let second = f.apply(f.invoice(), 600).unwrap();
        assert_eq!(f.credit().available(), Money::ZERO);
        assert_eq!(f.credit().status(), CreditStatus::Consumed);

        let reversed = f.ledger.reverse(f.tenant_id, second.id, f.actor, Utc::now()).unwrap();
        assert_eq!(reversed.status, ApplicationStatus::Reversed);
        assert_eq!(reversed.reversed_by, Some(f.actor));
        assert_eq!(f.credit().available(), Money::from_minor(600));
        assert_eq!(f.credit().status(), CreditStatus::Partial);

        let again = f.ledger.reverse(f.tenant_id, second.id, f.actor, Utc::now()).unwrap_err();
        assert!(matches!(again, LedgerError::Credit(CreditError::AlreadyReversed { .. })));
    }

    #[test]
    fn void_requires_no_live_applications() {
        let f = Fixture::new(1000);
        let app = f.apply(f.invoice(), 250).unwrap();

        let err = f.ledger.void(f.tenant_id, f.credit_id, f.actor, None, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Credit(CreditError::HasApplications { .. })));

        f.ledger.reverse(f.tenant_id, app.id, f.actor, Utc::now()).unwrap();
        let credit = f.ledger.void(f.tenant_id, f.credit_id, f.actor, None, Utc::now()).unwrap();
        assert_eq!(credit.status(), CreditStatus::Void);
        assert!(matches!(
            f.apply(f.invoice(), 1),
            Err(LedgerError::Credit(CreditError::Voided { .. }))
        ));
    }

    #[test]
    fn opening_is_idempotent_per_source_document() {
        let ledger = CreditLedger::new(dispatcher(), Arc::new(RecordLocks::new()));
        let tenant_id = TenantId::new();
        let source = DocumentId::new();
        let encf = Encf::compose(DocumentType::CreditNote, 7).unwrap();
        let owner = PartnerId::new();

        let a = ledger
            .open_credit(tenant_id, source, encf, owner, Money::from_minor(500), Utc::now())
            .unwrap();
        let b = ledger
            .open_credit(tenant_id, source, encf, owner, Money::from_minor(500), Utc::now())
            .unwrap();
        assert_eq!(a.id_typed(), b.id_typed());
        assert_eq!(ledger.list(tenant_id).len(), 1);
    }

    #[test]
    fn busy_credit_fails_fast() {
        let f = Fixture::new(1000);
        let _held = f
            .ledger
            .locks
            .try_lock(LockKey::record(f.tenant_id, f.credit_id.0))
            .unwrap();
        assert!(matches!(f.apply(f.invoice(), 10), Err(LedgerError::ResourceBusy(_))));
        assert_eq!(f.credit().available(), Money::from_minor(1000));
    }

    #[test]
    fn concurrent_applications_never_overdraw_the_credit() {
        let f = Fixture::new(5_000);
        let barrier = std::sync::Barrier::new(6);

        let applied: Vec<Money> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..6)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let mut mine = Vec::new();
                        loop {
                            match f.apply(f.invoice(), 70) {
                                Ok(app) => mine.push(app.amount),
                                Err(LedgerError::ResourceBusy(_)) => std::thread::yield_now(),
                                Err(LedgerError::Credit(CreditError::InsufficientBalance { .. }))
                                | Err(LedgerError::Credit(CreditError::Consumed { .. })) => break,
                                Err(other) => panic!("unexpected ledger error: {other}"),
                            }
                        }
                        mine
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        let credit = f.credit();
        // 71 whole applications of 70 fit in 5000, leaving 30.
        assert_eq!(applied.len(), 71);
        assert_eq!(credit.applied_total(), Money::saturating_sum(applied));
        assert_eq!(credit.available(), Money::from_minor(30));
        assert_eq!(
            credit.applied_total().checked_add(credit.available()),
            Some(credit.total())
        );
    }

    #[test]
    fn cancelling_an_invoice_reverses_its_applications() {
        let f = Fixture::new(1000);
        let invoice = f.invoice();
        let other = f.invoice();
        f.apply(invoice, 100).unwrap();
        f.apply(invoice, 200).unwrap();
        f.apply(other, 50).unwrap();

        assert_eq!(f.ledger.applications_for_invoice(f.tenant_id, invoice.invoice_id).len(), 2);
        let reversed = f
            .ledger
            .reverse_invoice_applications(f.tenant_id, invoice.invoice_id, f.actor, Utc::now());
        assert_eq!(reversed, 2);
        assert_eq!(f.credit().available(), Money::from_minor(950));
        assert!(f.ledger.applications_for_invoice(f.tenant_id, invoice.invoice_id).is_empty());
        assert_eq!(
            f.ledger.applied_total(f.tenant_id, f.credit_id).unwrap(),
            Money::from_minor(50)
        );
    }

    struct FailingReconciler {
        calls: Mutex<u32>,
    }

    impl Reconciler for FailingReconciler {
        fn reconcile(
            &self,
            _credit: &Credit,
            _application: &CreditApplication,
        ) -> Result<(), ReconcileError> {
            if let Ok(mut calls) = self.calls.lock() {
                *calls += 1;
            }
            Err(ReconcileError("no open receivable line".to_string()))
        }
    }

    #[test]
    fn reconciliation_failure_does_not_undo_the_application() {
        let reconciler = Arc::new(FailingReconciler { calls: Mutex::new(0) });
        let ledger = CreditLedger::with_reconciler(
            dispatcher(),
            Arc::new(RecordLocks::new()),
            reconciler.clone(),
        );
        let f = Fixture::with_ledger(ledger, 1000);

        let app = f.apply(f.invoice(), 300).unwrap();
        assert!(app.is_applied());
        assert_eq!(f.credit().available(), Money::from_minor(700));
        assert_eq!(*reconciler.calls.lock().unwrap(), 1);
    }

    proptest! {
        #[test]
        fn applied_never_exceeds_total(amounts in proptest::collection::vec(1i64..500, 1..20)) {
            let f = Fixture::new(2_000);
            for amount in amounts {
                let before = f.credit().available();
                match f.apply(f.invoice(), amount) {
                    Ok(_) => {}
                    Err(LedgerError::Credit(CreditError::InsufficientBalance { .. }))
                    | Err(LedgerError::Credit(CreditError::Consumed { .. })) => {
                        prop_assert_eq!(f.credit().available(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
                let credit = f.credit();
                prop_assert!(credit.applied_total() <= credit.total());
                prop_assert_eq!(
                    credit.applied_total().checked_add(credit.available()),
                    Some(credit.total())
                );
            }
        }
    }
}
