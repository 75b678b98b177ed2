use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ecf_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentId, DomainError, Money, PartnerId, TenantId,
    UserId,
};
use ecf_events::Event;
use ecf_sequencing::Encf;

use crate::application::{ApplicationId, ApplicationStatus, CreditApplication};
use crate::error::CreditError;
use crate::status::{CreditStatus, credit_status};

/// Credit identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditId(pub AggregateId);

impl CreditId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CreditId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: the balance of one accepted credit note.
///
/// The credit owns its applications so that apply and reverse each touch a
/// single stream: balance, status and application state change together.
///
/// Invariants:
/// - `0 <= available <= total`
/// - `total - available` equals the sum of `applied` application amounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    id: CreditId,
    tenant_id: Option<TenantId>,
    source_document: Option<DocumentId>,
    source_encf: Option<Encf>,
    owner: Option<PartnerId>,
    total: Money,
    available: Money,
    voided: bool,
    created_at: Option<DateTime<Utc>>,
    applications: Vec<CreditApplication>,
    version: u64,
    created: bool,
}

impl Credit {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CreditId) -> Self {
        Self {
            id,
            tenant_id: None,
            source_document: None,
            source_encf: None,
            owner: None,
            total: Money::ZERO,
            available: Money::ZERO,
            voided: false,
            created_at: None,
            applications: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CreditId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn source_document(&self) -> Option<DocumentId> {
        self.source_document
    }

    pub fn source_encf(&self) -> Option<Encf> {
        self.source_encf
    }

    pub fn owner(&self) -> Option<PartnerId> {
        self.owner
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn available(&self) -> Money {
        self.available
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn status(&self) -> CreditStatus {
        credit_status(self.available, self.total, self.voided)
    }

    pub fn applications(&self) -> &[CreditApplication] {
        &self.applications
    }

    pub fn application(&self, id: ApplicationId) -> Option<&CreditApplication> {
        self.applications.iter().find(|a| a.id == id)
    }

    /// Sum of non-reversed application amounts, computed from the applications.
    pub fn applied_total(&self) -> Money {
        Money::saturating_sum(
            self.applications
                .iter()
                .filter(|a| a.is_applied())
                .map(|a| a.amount),
        )
    }

    /// Applications currently deducting from this credit for `invoice_id`.
    pub fn applied_to(&self, invoice_id: DocumentId) -> impl Iterator<Item = &CreditApplication> {
        self.applications
            .iter()
            .filter(move |a| a.invoice_id == invoice_id && a.is_applied())
    }
}

impl AggregateRoot for Credit {
    type Id = CreditId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Invoice being paid with the credit, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTarget {
    pub invoice_id: DocumentId,
    pub owner: PartnerId,
    /// Amount still owed on the invoice, when known; the application may not exceed it.
    pub outstanding: Option<Money>,
}

/// Command: OpenCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCredit {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub source_document: DocumentId,
    pub source_encf: Encf,
    pub owner: PartnerId,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCredit {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub application_id: ApplicationId,
    pub invoice: InvoiceTarget,
    pub amount: Money,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseApplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseApplication {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub application_id: ApplicationId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidCredit {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub actor: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditCommand {
    OpenCredit(OpenCredit),
    ApplyCredit(ApplyCredit),
    ReverseApplication(ReverseApplication),
    VoidCredit(VoidCredit),
}

/// Event: CreditOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditOpened {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub source_document: DocumentId,
    pub source_encf: Encf,
    pub owner: PartnerId,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditApplied {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub application_id: ApplicationId,
    pub invoice_id: DocumentId,
    pub amount: Money,
    pub new_available: Money,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ApplicationReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationReversed {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub application_id: ApplicationId,
    pub invoice_id: DocumentId,
    pub amount: Money,
    pub new_available: Money,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditVoided {
    pub tenant_id: TenantId,
    pub credit_id: CreditId,
    pub actor: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditEvent {
    CreditOpened(CreditOpened),
    CreditApplied(CreditApplied),
    ApplicationReversed(ApplicationReversed),
    CreditVoided(CreditVoided),
}

impl Event for CreditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditEvent::CreditOpened(_) => "credits.credit.opened",
            CreditEvent::CreditApplied(_) => "credits.credit.applied",
            CreditEvent::ApplicationReversed(_) => "credits.credit.application_reversed",
            CreditEvent::CreditVoided(_) => "credits.credit.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CreditEvent::CreditOpened(e) => e.occurred_at,
            CreditEvent::CreditApplied(e) => e.occurred_at,
            CreditEvent::ApplicationReversed(e) => e.occurred_at,
            CreditEvent::CreditVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Credit {
    type Command = CreditCommand;
    type Event = CreditEvent;
    type Error = CreditError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CreditEvent::CreditOpened(e) => {
                self.id = e.credit_id;
                self.tenant_id = Some(e.tenant_id);
                self.source_document = Some(e.source_document);
                self.source_encf = Some(e.source_encf);
                self.owner = Some(e.owner);
                self.total = e.total;
                self.available = e.total;
                self.voided = false;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            CreditEvent::CreditApplied(e) => {
                self.available = e.new_available;
                self.applications.push(CreditApplication {
                    id: e.application_id,
                    credit_id: e.credit_id,
                    invoice_id: e.invoice_id,
                    amount: e.amount,
                    status: ApplicationStatus::Applied,
                    applied_at: e.occurred_at,
                    applied_by: e.actor,
                    reversed_at: None,
                    reversed_by: None,
                });
            }
            CreditEvent::ApplicationReversed(e) => {
                self.available = e.new_available;
                if let Some(app) = self
                    .applications
                    .iter_mut()
                    .find(|a| a.id == e.application_id)
                {
                    app.status = ApplicationStatus::Reversed;
                    app.reversed_at = Some(e.occurred_at);
                    app.reversed_by = Some(e.actor);
                }
            }
            CreditEvent::CreditVoided(_) => {
                self.voided = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CreditCommand::OpenCredit(cmd) => self.handle_open(cmd),
            CreditCommand::ApplyCredit(cmd) => self.handle_apply(cmd),
            CreditCommand::ReverseApplication(cmd) => self.handle_reverse(cmd),
            CreditCommand::VoidCredit(cmd) => self.handle_void(cmd),
        }
    }
}

impl Credit {
    fn ensure_target(&self, tenant_id: TenantId, credit_id: CreditId) -> Result<(), CreditError> {
        if !self.created {
            return Err(CreditError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch").into());
        }
        if self.id != credit_id {
            return Err(DomainError::invariant("credit_id mismatch").into());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCredit) -> Result<Vec<CreditEvent>, CreditError> {
        if self.created {
            return Err(CreditError::AlreadyOpened);
        }
        if !cmd.total.is_positive() {
            return Err(CreditError::InvalidTotal { total: cmd.total });
        }

        Ok(vec![CreditEvent::CreditOpened(CreditOpened {
            tenant_id: cmd.tenant_id,
            credit_id: cmd.credit_id,
            source_document: cmd.source_document,
            source_encf: cmd.source_encf,
            owner: cmd.owner,
            total: cmd.total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply(&self, cmd: &ApplyCredit) -> Result<Vec<CreditEvent>, CreditError> {
        self.ensure_target(cmd.tenant_id, cmd.credit_id)?;
        let credit_id = self.id;

        match self.status() {
            CreditStatus::Void => return Err(CreditError::Voided { credit_id }),
            CreditStatus::Consumed => return Err(CreditError::Consumed { credit_id }),
            CreditStatus::Available | CreditStatus::Partial => {}
        }

        if !cmd.amount.is_positive() {
            return Err(CreditError::InvalidAmount {
                credit_id,
                amount: cmd.amount,
            });
        }

        if cmd.amount > self.available {
            return Err(CreditError::InsufficientBalance {
                credit_id,
                available: self.available,
                requested: cmd.amount,
            });
        }

        if let Some(owner) = self.owner {
            if owner != cmd.invoice.owner {
                return Err(CreditError::OwnerMismatch {
                    credit_id,
                    credit_owner: owner,
                    invoice_owner: cmd.invoice.owner,
                });
            }
        }

        if let Some(outstanding) = cmd.invoice.outstanding {
            if cmd.amount > outstanding {
                return Err(CreditError::ExceedsInvoiceBalance {
                    credit_id,
                    invoice_id: cmd.invoice.invoice_id,
                    outstanding,
                    requested: cmd.amount,
                });
            }
        }

        if self.application(cmd.application_id).is_some() {
            return Err(DomainError::conflict(format!(
                "application {} already recorded",
                cmd.application_id
            ))
            .into());
        }

        let new_available = self
            .available
            .checked_sub(cmd.amount)
            .ok_or_else(|| DomainError::invariant("credit balance underflow"))?;

        Ok(vec![CreditEvent::CreditApplied(CreditApplied {
            tenant_id: cmd.tenant_id,
            credit_id,
            application_id: cmd.application_id,
            invoice_id: cmd.invoice.invoice_id,
            amount: cmd.amount,
            new_available,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseApplication) -> Result<Vec<CreditEvent>, CreditError> {
        self.ensure_target(cmd.tenant_id, cmd.credit_id)?;

        let app = self
            .application(cmd.application_id)
            .ok_or(CreditError::ApplicationNotFound {
                credit_id: self.id,
                application_id: cmd.application_id,
            })?;

        if app.status == ApplicationStatus::Reversed {
            return Err(CreditError::AlreadyReversed {
                application_id: app.id,
            });
        }

        let new_available = self
            .available
            .checked_add(app.amount)
            .filter(|a| *a <= self.total)
            .ok_or_else(|| DomainError::invariant("reversal would exceed credit total"))?;

        Ok(vec![CreditEvent::ApplicationReversed(ApplicationReversed {
            tenant_id: cmd.tenant_id,
            credit_id: self.id,
            application_id: app.id,
            invoice_id: app.invoice_id,
            amount: app.amount,
            new_available,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidCredit) -> Result<Vec<CreditEvent>, CreditError> {
        self.ensure_target(cmd.tenant_id, cmd.credit_id)?;

        if self.voided {
            return Err(CreditError::Voided { credit_id: self.id });
        }

        let applied_total = self.applied_total();
        if applied_total.is_positive() {
            return Err(CreditError::HasApplications {
                credit_id: self.id,
                applied_total,
            });
        }

        Ok(vec![CreditEvent::CreditVoided(CreditVoided {
            tenant_id: cmd.tenant_id,
            credit_id: self.id,
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
