use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ecf_core::{Aggregate, AggregateRoot, DocumentId, DomainError, Money, PartnerId, TenantId};
use ecf_events::Event;
use ecf_sequencing::{DocumentType, Encf, IssuingLocation, RangeId};

use crate::error::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    CreditNote,
    DebitNote,
}

impl DocumentKind {
    pub fn of(document_type: DocumentType) -> Self {
        if document_type.is_credit_note() {
            DocumentKind::CreditNote
        } else if document_type.is_debit_note() {
            DocumentKind::DebitNote
        } else {
            DocumentKind::Invoice
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Registered,
    Numbered,
    Submitted,
    Cancelled,
}

/// Acceptance status reported by the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulatorStatus {
    NotSent,
    Pending,
    Accepted,
    Rejected,
}

/// Document modified by a credit or debit note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub document_id: DocumentId,
    /// For credit notes: what is left of the referenced total after other
    /// non-cancelled credit notes.
    pub creditable: Option<Money>,
}

/// Aggregate root: a fiscal document that consumes one number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiscalDocument {
    id: DocumentId,
    tenant_id: Option<TenantId>,
    document_type: DocumentType,
    location: Option<IssuingLocation>,
    owner: Option<PartnerId>,
    buyer_rnc: Option<String>,
    total: Money,
    reference: Option<DocumentId>,
    encf: Option<Encf>,
    numbered_from: Option<RangeId>,
    track_id: Option<String>,
    regulator_status: RegulatorStatus,
    regulator_messages: Option<String>,
    state: DocumentState,
    registered_at: Option<DateTime<Utc>>,
    last_status_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl FiscalDocument {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DocumentId) -> Self {
        Self {
            id,
            tenant_id: None,
            document_type: DocumentType::FiscalCredit,
            location: None,
            owner: None,
            buyer_rnc: None,
            total: Money::ZERO,
            reference: None,
            encf: None,
            numbered_from: None,
            track_id: None,
            regulator_status: RegulatorStatus::NotSent,
            regulator_messages: None,
            state: DocumentState::Registered,
            registered_at: None,
            last_status_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::of(self.document_type)
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn location(&self) -> Option<&IssuingLocation> {
        self.location.as_ref()
    }

    pub fn owner(&self) -> Option<PartnerId> {
        self.owner
    }

    pub fn buyer_rnc(&self) -> Option<&str> {
        self.buyer_rnc.as_deref()
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn reference(&self) -> Option<DocumentId> {
        self.reference
    }

    pub fn encf(&self) -> Option<Encf> {
        self.encf
    }

    pub fn numbered_from(&self) -> Option<RangeId> {
        self.numbered_from
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn regulator_status(&self) -> RegulatorStatus {
        self.regulator_status
    }

    pub fn regulator_messages(&self) -> Option<&str> {
        self.regulator_messages.as_deref()
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at
    }

    pub fn last_status_at(&self) -> Option<DateTime<Utc>> {
        self.last_status_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == DocumentState::Cancelled
    }

    /// Submitted and still waiting for a final answer from the regulator.
    pub fn awaiting_regulator(&self) -> bool {
        self.state == DocumentState::Submitted
            && self.track_id.is_some()
            && matches!(
                self.regulator_status,
                RegulatorStatus::Pending | RegulatorStatus::NotSent
            )
    }
}

impl AggregateRoot for FiscalDocument {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDocument {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub owner: PartnerId,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    pub reference: Option<DocumentReference>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignNumber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignNumber {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub encf: Encf,
    pub range_id: RangeId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSubmitted {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub track_id: String,
    pub status: RegulatorStatus,
    pub messages: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRegulatorStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRegulatorStatus {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub status: RegulatorStatus,
    pub messages: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDocument {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    RegisterDocument(RegisterDocument),
    AssignNumber(AssignNumber),
    MarkSubmitted(MarkSubmitted),
    RecordRegulatorStatus(RecordRegulatorStatus),
    CancelDocument(CancelDocument),
}

/// Event: DocumentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRegistered {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub owner: PartnerId,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    pub reference: Option<DocumentId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NumberAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberAssigned {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub encf: Encf,
    pub range_id: RangeId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSubmitted {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub track_id: String,
    pub status: RegulatorStatus,
    pub messages: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RegulatorStatusRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorStatusRecorded {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub status: RegulatorStatus,
    pub messages: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCancelled {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    DocumentRegistered(DocumentRegistered),
    NumberAssigned(NumberAssigned),
    DocumentSubmitted(DocumentSubmitted),
    RegulatorStatusRecorded(RegulatorStatusRecorded),
    DocumentCancelled(DocumentCancelled),
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::DocumentRegistered(_) => "documents.document.registered",
            DocumentEvent::NumberAssigned(_) => "documents.document.number_assigned",
            DocumentEvent::DocumentSubmitted(_) => "documents.document.submitted",
            DocumentEvent::RegulatorStatusRecorded(_) => "documents.document.status_recorded",
            DocumentEvent::DocumentCancelled(_) => "documents.document.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::DocumentRegistered(e) => e.occurred_at,
            DocumentEvent::NumberAssigned(e) => e.occurred_at,
            DocumentEvent::DocumentSubmitted(e) => e.occurred_at,
            DocumentEvent::RegulatorStatusRecorded(e) => e.occurred_at,
            DocumentEvent::DocumentCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for FiscalDocument {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = DocumentError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::DocumentRegistered(e) => {
                self.id = e.document_id;
                self.tenant_id = Some(e.tenant_id);
                self.document_type = e.document_type;
                self.location = Some(e.location.clone());
                self.owner = Some(e.owner);
                self.buyer_rnc = e.buyer_rnc.clone();
                self.total = e.total;
                self.reference = e.reference;
                self.state = DocumentState::Registered;
                self.registered_at = Some(e.occurred_at);
                self.created = true;
            }
            DocumentEvent::NumberAssigned(e) => {
                self.encf = Some(e.encf);
                self.numbered_from = Some(e.range_id);
                self.state = DocumentState::Numbered;
            }
            DocumentEvent::DocumentSubmitted(e) => {
                self.track_id = Some(e.track_id.clone());
                self.regulator_status = e.status;
                self.regulator_messages = e.messages.clone();
                self.last_status_at = Some(e.occurred_at);
                self.state = DocumentState::Submitted;
            }
            DocumentEvent::RegulatorStatusRecorded(e) => {
                self.regulator_status = e.status;
                self.regulator_messages = e.messages.clone();
                self.last_status_at = Some(e.occurred_at);
            }
            DocumentEvent::DocumentCancelled(_) => {
                self.state = DocumentState::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DocumentCommand::RegisterDocument(cmd) => self.handle_register(cmd),
            DocumentCommand::AssignNumber(cmd) => self.handle_assign_number(cmd),
            DocumentCommand::MarkSubmitted(cmd) => self.handle_submitted(cmd),
            DocumentCommand::RecordRegulatorStatus(cmd) => self.handle_record_status(cmd),
            DocumentCommand::CancelDocument(cmd) => self.handle_cancel(cmd),
        }
    }
}

/// Digits of an RNC (9) or cédula (11), ignoring dashes and spaces.
fn normalize_rnc(raw: &str) -> Result<String, DocumentError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let only_separators = raw
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == ' ');
    if !only_separators || !(digits.len() == 9 || digits.len() == 11) {
        return Err(DocumentError::InvalidBuyerRnc(raw.to_string()));
    }
    Ok(digits)
}

impl FiscalDocument {
    fn ensure_target(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
    ) -> Result<(), DocumentError> {
        if !self.created {
            return Err(DocumentError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch").into());
        }
        if self.id != document_id {
            return Err(DomainError::invariant("document_id mismatch").into());
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> Result<(), DocumentError> {
        if self.is_cancelled() {
            return Err(DocumentError::Cancelled {
                document_id: self.id,
            });
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        if self.created {
            return Err(DocumentError::AlreadyExists);
        }
        if !cmd.total.is_positive() {
            return Err(DocumentError::InvalidTotal(cmd.total));
        }

        let buyer_rnc = match cmd.buyer_rnc.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(normalize_rnc(raw)?),
            _ if cmd.document_type.requires_buyer_rnc() => {
                return Err(DocumentError::MissingBuyerRnc(cmd.document_type));
            }
            _ => None,
        };

        let kind = DocumentKind::of(cmd.document_type);
        if kind != DocumentKind::Invoice && cmd.reference.is_none() {
            return Err(DocumentError::MissingReference(cmd.document_type));
        }
        if kind == DocumentKind::CreditNote {
            if let Some(DocumentReference {
                document_id,
                creditable: Some(creditable),
            }) = cmd.reference
            {
                if cmd.total > creditable {
                    return Err(DocumentError::ExceedsReferencedTotal {
                        reference: document_id,
                        total: cmd.total,
                        creditable,
                    });
                }
            }
        }

        Ok(vec![DocumentEvent::DocumentRegistered(DocumentRegistered {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            document_type: cmd.document_type,
            location: cmd.location.clone(),
            owner: cmd.owner,
            buyer_rnc,
            total: cmd.total,
            reference: cmd.reference.map(|r| r.document_id),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_number(
        &self,
        cmd: &AssignNumber,
    ) -> Result<Vec<DocumentEvent>, DocumentError> {
        self.ensure_target(cmd.tenant_id, cmd.document_id)?;
        self.ensure_not_cancelled()?;

        if let Some(encf) = self.encf {
            return Err(DocumentError::AlreadyNumbered {
                document_id: self.id,
                encf,
            });
        }
        if cmd.encf.document_type() != self.document_type {
            return Err(DocumentError::TypeMismatch {
                document_type: self.document_type,
                encf: cmd.encf,
            });
        }

        Ok(vec![DocumentEvent::NumberAssigned(NumberAssigned {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            encf: cmd.encf,
            range_id: cmd.range_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submitted(&self, cmd: &MarkSubmitted) -> Result<Vec<DocumentEvent>, DocumentError> {
        self.ensure_target(cmd.tenant_id, cmd.document_id)?;
        self.ensure_not_cancelled()?;

        match self.state {
            DocumentState::Numbered => {}
            DocumentState::Registered => {
                return Err(DocumentError::NotNumbered {
                    document_id: self.id,
                });
            }
            state => {
                return Err(DocumentError::InvalidState {
                    document_id: self.id,
                    state,
                    action: "submit",
                });
            }
        }
        if cmd.track_id.trim().is_empty() {
            return Err(DomainError::validation("track id must not be empty").into());
        }

        Ok(vec![DocumentEvent::DocumentSubmitted(DocumentSubmitted {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            track_id: cmd.track_id.clone(),
            status: cmd.status,
            messages: cmd.messages.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_status(
        &self,
        cmd: &RecordRegulatorStatus,
    ) -> Result<Vec<DocumentEvent>, DocumentError> {
        self.ensure_target(cmd.tenant_id, cmd.document_id)?;
        self.ensure_not_cancelled()?;

        if self.state != DocumentState::Submitted {
            return Err(DocumentError::NotSubmitted {
                document_id: self.id,
            });
        }

        if cmd.status == self.regulator_status && cmd.messages == self.regulator_messages {
            return Ok(vec![]);
        }

        Ok(vec![DocumentEvent::RegulatorStatusRecorded(RegulatorStatusRecorded {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            status: cmd.status,
            messages: cmd.messages.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelDocument) -> Result<Vec<DocumentEvent>, DocumentError> {
        self.ensure_target(cmd.tenant_id, cmd.document_id)?;
        self.ensure_not_cancelled()?;

        Ok(vec![DocumentEvent::DocumentCancelled(DocumentCancelled {
            tenant_id: cmd.tenant_id,
            document_id: cmd.document_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecf_core::AggregateId;
    use ecf_events::execute;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_cmd(tenant_id: TenantId, document_id: DocumentId) -> RegisterDocument {
        RegisterDocument {
            tenant_id,
            document_id,
            document_type: DocumentType::FiscalCredit,
            location: IssuingLocation::new("001", "001").unwrap(),
            owner: PartnerId::new(),
            buyer_rnc: Some("131-79388-2".to_string()),
            total: Money::from_minor(118_000),
            reference: None,
            occurred_at: now(),
        }
    }

    fn registered() -> (FiscalDocument, TenantId) {
        let tenant_id = TenantId::new();
        let document_id = DocumentId::new();
        let mut doc = FiscalDocument::empty(document_id);
        execute(
            &mut doc,
            &DocumentCommand::RegisterDocument(register_cmd(tenant_id, document_id)),
        )
        .unwrap();
        (doc, tenant_id)
    }

    fn assign(doc: &FiscalDocument, tenant_id: TenantId, encf: Encf) -> DocumentCommand {
        DocumentCommand::AssignNumber(AssignNumber {
            tenant_id,
            document_id: doc.id_typed(),
            encf,
            range_id: RangeId::new(AggregateId::new()),
            occurred_at: now(),
        })
    }

    #[test]
    fn register_normalizes_rnc() {
        let (doc, _) = registered();
        assert_eq!(doc.buyer_rnc(), Some("131793882"));
        assert_eq!(doc.kind(), DocumentKind::Invoice);
        assert_eq!(doc.regulator_status(), RegulatorStatus::NotSent);
    }

    #[test]
    fn rnc_required_unless_type_exempts_it() {
        let tenant_id = TenantId::new();
        let document_id = DocumentId::new();
        let doc = FiscalDocument::empty(document_id);

        let mut cmd = register_cmd(tenant_id, document_id);
        cmd.buyer_rnc = None;
        assert_eq!(
            doc.handle(&DocumentCommand::RegisterDocument(cmd.clone())),
            Err(DocumentError::MissingBuyerRnc(DocumentType::FiscalCredit))
        );

        cmd.document_type = DocumentType::Consumer;
        assert!(doc.handle(&DocumentCommand::RegisterDocument(cmd.clone())).is_ok());

        cmd.buyer_rnc = Some("12345".to_string());
        assert!(matches!(
            doc.handle(&DocumentCommand::RegisterDocument(cmd)),
            Err(DocumentError::InvalidBuyerRnc(_))
        ));
    }

    #[test]
    fn credit_note_needs_reference_within_creditable_amount() {
        let tenant_id = TenantId::new();
        let document_id = DocumentId::new();
        let doc = FiscalDocument::empty(document_id);

        let mut cmd = register_cmd(tenant_id, document_id);
        cmd.document_type = DocumentType::CreditNote;
        assert_eq!(
            doc.handle(&DocumentCommand::RegisterDocument(cmd.clone())),
            Err(DocumentError::MissingReference(DocumentType::CreditNote))
        );

        let original = DocumentId::new();
        cmd.reference = Some(DocumentReference {
            document_id: original,
            creditable: Some(Money::from_minor(100_000)),
        });
        assert!(matches!(
            doc.handle(&DocumentCommand::RegisterDocument(cmd.clone())),
            Err(DocumentError::ExceedsReferencedTotal { .. })
        ));

        cmd.total = Money::from_minor(100_000);
        assert!(doc.handle(&DocumentCommand::RegisterDocument(cmd)).is_ok());
    }

    #[test]
    fn numbered_only_once_and_type_must_match() {
        let (mut doc, tenant_id) = registered();

        let wrong = Encf::compose(DocumentType::Consumer, 1).unwrap();
        assert!(matches!(
            doc.handle(&assign(&doc, tenant_id, wrong)),
            Err(DocumentError::TypeMismatch { .. })
        ));

        let encf = Encf::compose(DocumentType::FiscalCredit, 1).unwrap();
        let cmd = assign(&doc, tenant_id, encf);
        execute(&mut doc, &cmd).unwrap();
        assert_eq!(doc.encf(), Some(encf));
        assert_eq!(doc.state(), DocumentState::Numbered);

        let again = assign(&doc, tenant_id, Encf::compose(DocumentType::FiscalCredit, 2).unwrap());
        assert_eq!(
            doc.handle(&again),
            Err(DocumentError::AlreadyNumbered {
                document_id: doc.id_typed(),
                encf
            })
        );
    }

    #[test]
    fn status_lifecycle_and_idempotent_recording() {
        let (mut doc, tenant_id) = registered();
        let document_id = doc.id_typed();

        let submit = DocumentCommand::MarkSubmitted(MarkSubmitted {
            tenant_id,
            document_id,
            track_id: "trk-1".to_string(),
            status: RegulatorStatus::Pending,
            messages: None,
            occurred_at: now(),
        });
        assert!(matches!(
            doc.handle(&submit),
            Err(DocumentError::NotNumbered { .. })
        ));

        let cmd = assign(&doc, tenant_id, Encf::compose(DocumentType::FiscalCredit, 9).unwrap());
        execute(&mut doc, &cmd).unwrap();
        execute(&mut doc, &submit).unwrap();
        assert!(doc.awaiting_regulator());

        let accepted = DocumentCommand::RecordRegulatorStatus(RecordRegulatorStatus {
            tenant_id,
            document_id,
            status: RegulatorStatus::Accepted,
            messages: Some("0: Aceptado".to_string()),
            occurred_at: now(),
        });
        assert_eq!(execute(&mut doc, &accepted).unwrap().len(), 1);
        assert!(execute(&mut doc, &accepted).unwrap().is_empty());
        assert_eq!(doc.regulator_status(), RegulatorStatus::Accepted);
        assert!(!doc.awaiting_regulator());
    }

    #[test]
    fn cancelled_documents_reject_further_commands() {
        let (mut doc, tenant_id) = registered();
        let cancel = DocumentCommand::CancelDocument(CancelDocument {
            tenant_id,
            document_id: doc.id_typed(),
            reason: None,
            occurred_at: now(),
        });
        execute(&mut doc, &cancel).unwrap();

        assert!(matches!(doc.handle(&cancel), Err(DocumentError::Cancelled { .. })));
        let cmd = assign(&doc, tenant_id, Encf::compose(DocumentType::FiscalCredit, 1).unwrap());
        assert!(matches!(doc.handle(&cmd), Err(DocumentError::Cancelled { .. })));
    }
}
