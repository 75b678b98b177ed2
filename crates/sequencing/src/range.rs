use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ecf_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use ecf_events::Event;

use crate::document_type::DocumentType;
use crate::encf::Encf;
use crate::error::RangeError;
use crate::location::IssuingLocation;
use crate::selection::overlaps;

/// Sequence range identifier (tenant-scoped via `tenant_id` on commands/events).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeId(pub AggregateId);

impl RangeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RangeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Externally visible range status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeStatus {
    Draft,
    Active,
    Exhausted,
    Expired,
    Voided,
}

impl core::fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RangeStatus::Draft => "draft",
            RangeStatus::Active => "active",
            RangeStatus::Exhausted => "exhausted",
            RangeStatus::Expired => "expired",
            RangeStatus::Voided => "voided",
        };
        f.write_str(s)
    }
}

/// Status set by explicit transitions; `Exhausted` is derived from the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Lifecycle {
    Draft,
    Active,
    Expired,
    Voided,
}

/// Aggregate root: a regulator-authorized block of fiscal numbers.
///
/// Invariants:
/// - `1 <= lower <= upper <= Encf::MAX_SEQUENCE`
/// - `lower - 1 <= cursor <= upper`; `cursor` is the last issued number
/// - status is `exhausted` exactly when an active range has `cursor == upper`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRange {
    id: RangeId,
    tenant_id: Option<TenantId>,
    name: String,
    document_type: DocumentType,
    location: Option<IssuingLocation>,
    lower: u64,
    upper: u64,
    cursor: u64,
    expires_on: Option<NaiveDate>,
    lifecycle: Lifecycle,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl SequenceRange {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RangeId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            document_type: DocumentType::FiscalCredit,
            location: None,
            lower: 0,
            upper: 0,
            cursor: 0,
            expires_on: None,
            lifecycle: Lifecycle::Draft,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RangeId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn location(&self) -> Option<&IssuingLocation> {
        self.location.as_ref()
    }

    pub fn lower(&self) -> u64 {
        self.lower
    }

    pub fn upper(&self) -> u64 {
        self.upper
    }

    /// Last issued number (`lower - 1` when nothing was issued yet).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn expires_on(&self) -> Option<NaiveDate> {
        self.expires_on
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn status(&self) -> RangeStatus {
        match self.lifecycle {
            Lifecycle::Draft => RangeStatus::Draft,
            Lifecycle::Active if self.cursor >= self.upper => RangeStatus::Exhausted,
            Lifecycle::Active => RangeStatus::Active,
            Lifecycle::Expired => RangeStatus::Expired,
            Lifecycle::Voided => RangeStatus::Voided,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.cursor < self.upper
    }

    /// Expiration date strictly before `as_of`, whatever the document type.
    pub fn is_past_expiration(&self, as_of: NaiveDate) -> bool {
        self.expires_on.is_some_and(|d| d < as_of)
    }

    /// Whether issuance must skip this range as of `as_of`. Credit-note
    /// ranges keep numbering past their date until the sweep flips them.
    pub fn is_stale_for_issuance(&self, as_of: NaiveDate) -> bool {
        self.document_type.ranges_expire() && self.is_past_expiration(as_of)
    }

    /// Numbers still available.
    pub fn remaining(&self) -> u64 {
        self.upper.saturating_sub(self.cursor)
    }

    /// Numbers already issued.
    pub fn issued(&self) -> u64 {
        self.cursor.saturating_sub(self.lower.saturating_sub(1))
    }

    pub fn percent_used(&self) -> f64 {
        let size = self.upper.saturating_sub(self.lower) + 1;
        if !self.created || size == 0 {
            return 0.0;
        }
        (self.issued() as f64 / size as f64) * 100.0
    }

    /// Days left until expiration; negative once past it.
    pub fn days_to_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|d| (d - today).num_days())
    }

    /// Fiscal number for a number issued from this range.
    pub fn encf_for(&self, number: u64) -> Result<Encf, DomainError> {
        Encf::compose(self.document_type, number)
    }
}

impl AggregateRoot for SequenceRange {
    type Id = RangeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Another active range with the same type and location, used for the overlap guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRange {
    pub range_id: RangeId,
    pub lower: u64,
    pub upper: u64,
}

/// Command: CreateRange. The range starts in `draft` with `cursor = lower - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRange {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub name: String,
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseRange (draft only). Replaces name, bounds and expiration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseRange {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub name: String,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateRange.
///
/// `active_peers` are the currently active ranges for the same type + location
/// as read under the pool lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRange {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub today: NaiveDate,
    pub active_peers: Vec<PeerRange>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueSequence. Hands out `cursor + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSequence {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidRange (manual cancellation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRange {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireRange. Emits nothing when the range is not due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireRange {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeCommand {
    CreateRange(CreateRange),
    ReviseRange(ReviseRange),
    ActivateRange(ActivateRange),
    IssueSequence(IssueSequence),
    VoidRange(VoidRange),
    ExpireRange(ExpireRange),
}

/// Event: RangeCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCreated {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub name: String,
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RangeRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRevised {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub name: String,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RangeActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeActivated {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SequenceIssued. `exhausted` is set on the issuance that reaches `upper`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceIssued {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub number: u64,
    pub exhausted: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RangeVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeVoided {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RangeExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeExpired {
    pub tenant_id: TenantId,
    pub range_id: RangeId,
    pub expires_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeEvent {
    RangeCreated(RangeCreated),
    RangeRevised(RangeRevised),
    RangeActivated(RangeActivated),
    SequenceIssued(SequenceIssued),
    RangeVoided(RangeVoided),
    RangeExpired(RangeExpired),
}

impl Event for RangeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RangeEvent::RangeCreated(_) => "sequencing.range.created",
            RangeEvent::RangeRevised(_) => "sequencing.range.revised",
            RangeEvent::RangeActivated(_) => "sequencing.range.activated",
            RangeEvent::SequenceIssued(_) => "sequencing.range.sequence_issued",
            RangeEvent::RangeVoided(_) => "sequencing.range.voided",
            RangeEvent::RangeExpired(_) => "sequencing.range.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RangeEvent::RangeCreated(e) => e.occurred_at,
            RangeEvent::RangeRevised(e) => e.occurred_at,
            RangeEvent::RangeActivated(e) => e.occurred_at,
            RangeEvent::SequenceIssued(e) => e.occurred_at,
            RangeEvent::RangeVoided(e) => e.occurred_at,
            RangeEvent::RangeExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SequenceRange {
    type Command = RangeCommand;
    type Event = RangeEvent;
    type Error = RangeError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RangeEvent::RangeCreated(e) => {
                self.id = e.range_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.document_type = e.document_type;
                self.location = Some(e.location.clone());
                self.lower = e.lower;
                self.upper = e.upper;
                self.cursor = e.lower - 1;
                self.expires_on = e.expires_on;
                self.lifecycle = Lifecycle::Draft;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            RangeEvent::RangeRevised(e) => {
                self.name = e.name.clone();
                self.lower = e.lower;
                self.upper = e.upper;
                self.cursor = e.lower - 1;
                self.expires_on = e.expires_on;
            }
            RangeEvent::RangeActivated(_) => {
                self.lifecycle = Lifecycle::Active;
            }
            RangeEvent::SequenceIssued(e) => {
                self.cursor = e.number;
            }
            RangeEvent::RangeVoided(_) => {
                self.lifecycle = Lifecycle::Voided;
            }
            RangeEvent::RangeExpired(_) => {
                self.lifecycle = Lifecycle::Expired;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RangeCommand::CreateRange(cmd) => self.handle_create(cmd),
            RangeCommand::ReviseRange(cmd) => self.handle_revise(cmd),
            RangeCommand::ActivateRange(cmd) => self.handle_activate(cmd),
            RangeCommand::IssueSequence(cmd) => self.handle_issue(cmd),
            RangeCommand::VoidRange(cmd) => self.handle_void(cmd),
            RangeCommand::ExpireRange(cmd) => self.handle_expire(cmd),
        }
    }
}

impl SequenceRange {
    fn ensure_target(&self, tenant_id: TenantId, range_id: RangeId) -> Result<(), RangeError> {
        if !self.created {
            return Err(RangeError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch").into());
        }
        if self.id != range_id {
            return Err(DomainError::invariant("range_id mismatch").into());
        }
        Ok(())
    }

    fn check_definition(
        document_type: DocumentType,
        lower: u64,
        upper: u64,
        expires_on: Option<NaiveDate>,
        name: &str,
    ) -> Result<(), RangeError> {
        if name.trim().is_empty() {
            return Err(DomainError::validation("range name must not be empty").into());
        }
        if lower == 0 {
            return Err(RangeError::InvalidBounds {
                lower,
                upper,
                reason: "lower bound must be at least 1",
            });
        }
        if lower > upper {
            return Err(RangeError::InvalidBounds {
                lower,
                upper,
                reason: "lower bound must not exceed upper bound",
            });
        }
        if upper > Encf::MAX_SEQUENCE {
            return Err(RangeError::InvalidBounds {
                lower,
                upper,
                reason: "upper bound must fit in ten digits",
            });
        }
        if document_type.ranges_expire() && expires_on.is_none() {
            return Err(RangeError::MissingExpiration(document_type));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateRange) -> Result<Vec<RangeEvent>, RangeError> {
        if self.created {
            return Err(RangeError::AlreadyExists);
        }
        Self::check_definition(
            cmd.document_type,
            cmd.lower,
            cmd.upper,
            cmd.expires_on,
            &cmd.name,
        )?;

        Ok(vec![RangeEvent::RangeCreated(RangeCreated {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            name: cmd.name.trim().to_string(),
            document_type: cmd.document_type,
            location: cmd.location.clone(),
            lower: cmd.lower,
            upper: cmd.upper,
            expires_on: cmd.expires_on,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseRange) -> Result<Vec<RangeEvent>, RangeError> {
        self.ensure_target(cmd.tenant_id, cmd.range_id)?;
        if self.status() != RangeStatus::Draft {
            return Err(RangeError::InvalidState {
                range_id: self.id,
                status: self.status(),
                action: "revise",
            });
        }
        Self::check_definition(
            self.document_type,
            cmd.lower,
            cmd.upper,
            cmd.expires_on,
            &cmd.name,
        )?;

        Ok(vec![RangeEvent::RangeRevised(RangeRevised {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            name: cmd.name.trim().to_string(),
            lower: cmd.lower,
            upper: cmd.upper,
            expires_on: cmd.expires_on,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateRange) -> Result<Vec<RangeEvent>, RangeError> {
        self.ensure_target(cmd.tenant_id, cmd.range_id)?;

        if self.status() != RangeStatus::Draft {
            return Err(RangeError::InvalidState {
                range_id: self.id,
                status: self.status(),
                action: "activate",
            });
        }

        if self.is_past_expiration(cmd.today) {
            if let Some(expires_on) = self.expires_on {
                return Err(RangeError::AlreadyExpired {
                    range_id: self.id,
                    expires_on,
                    today: cmd.today,
                });
            }
        }

        if let Some(peer) = cmd
            .active_peers
            .iter()
            .filter(|p| p.range_id != self.id)
            .find(|p| overlaps(self.lower, self.upper, p.lower, p.upper))
        {
            return Err(RangeError::Overlap {
                range_id: self.id,
                lower: self.lower,
                upper: self.upper,
                other: peer.range_id,
                other_lower: peer.lower,
                other_upper: peer.upper,
            });
        }

        Ok(vec![RangeEvent::RangeActivated(RangeActivated {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueSequence) -> Result<Vec<RangeEvent>, RangeError> {
        self.ensure_target(cmd.tenant_id, cmd.range_id)?;

        if self.lifecycle != Lifecycle::Active {
            return Err(RangeError::NotActive {
                range_id: self.id,
                status: self.status(),
            });
        }

        let candidate = self.cursor + 1;
        if candidate > self.upper {
            return Err(RangeError::Exhausted {
                range_id: self.id,
                cursor: self.cursor,
                upper: self.upper,
            });
        }

        Ok(vec![RangeEvent::SequenceIssued(SequenceIssued {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            number: candidate,
            exhausted: candidate == self.upper,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidRange) -> Result<Vec<RangeEvent>, RangeError> {
        self.ensure_target(cmd.tenant_id, cmd.range_id)?;

        match self.status() {
            RangeStatus::Draft | RangeStatus::Active => {}
            status => {
                return Err(RangeError::InvalidState {
                    range_id: self.id,
                    status,
                    action: "void",
                });
            }
        }

        Ok(vec![RangeEvent::RangeVoided(RangeVoided {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireRange) -> Result<Vec<RangeEvent>, RangeError> {
        self.ensure_target(cmd.tenant_id, cmd.range_id)?;

        if self.status() != RangeStatus::Active || !self.is_past_expiration(cmd.as_of) {
            return Ok(vec![]);
        }
        let Some(expires_on) = self.expires_on else {
            return Ok(vec![]);
        };

        Ok(vec![RangeEvent::RangeExpired(RangeExpired {
            tenant_id: cmd.tenant_id,
            range_id: cmd.range_id,
            expires_on,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecf_events::execute;
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn location() -> IssuingLocation {
        IssuingLocation::new("001", "001").unwrap()
    }

    fn create_cmd(tenant_id: TenantId, range_id: RangeId, lower: u64, upper: u64) -> CreateRange {
        CreateRange {
            tenant_id,
            range_id,
            name: "Facturas 2026".to_string(),
            document_type: DocumentType::FiscalCredit,
            location: location(),
            lower,
            upper,
            expires_on: Some(day(2026, 12, 31)),
            occurred_at: now(),
        }
    }

    fn active_range(lower: u64, upper: u64) -> (SequenceRange, TenantId) {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        execute(
            &mut range,
            &RangeCommand::CreateRange(create_cmd(tenant_id, range_id, lower, upper)),
        )
        .unwrap();
        execute(
            &mut range,
            &RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id,
                today: day(2026, 1, 15),
                active_peers: vec![],
                occurred_at: now(),
            }),
        )
        .unwrap();
        (range, tenant_id)
    }

    fn issue(range: &mut SequenceRange, tenant_id: TenantId) -> Result<u64, RangeError> {
        let events = execute(
            range,
            &RangeCommand::IssueSequence(IssueSequence {
                tenant_id,
                range_id: range.id_typed(),
                occurred_at: now(),
            }),
        )?;
        match &events[0] {
            RangeEvent::SequenceIssued(e) => Ok(e.number),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn create_starts_draft_with_cursor_below_lower() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        execute(
            &mut range,
            &RangeCommand::CreateRange(create_cmd(tenant_id, range_id, 100, 200)),
        )
        .unwrap();

        assert_eq!(range.status(), RangeStatus::Draft);
        assert_eq!(range.cursor(), 99);
        assert_eq!(range.remaining(), 101);
        assert_eq!(range.version(), 1);
    }

    #[test]
    fn create_rejects_inverted_or_zero_bounds() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let range = SequenceRange::empty(range_id);

        let err = range
            .handle(&RangeCommand::CreateRange(create_cmd(tenant_id, range_id, 5, 4)))
            .unwrap_err();
        assert!(matches!(err, RangeError::InvalidBounds { lower: 5, upper: 4, .. }));

        let err = range
            .handle(&RangeCommand::CreateRange(create_cmd(tenant_id, range_id, 0, 4)))
            .unwrap_err();
        assert!(matches!(err, RangeError::InvalidBounds { lower: 0, .. }));
    }

    #[test]
    fn expiring_types_require_a_date_but_credit_notes_do_not() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let range = SequenceRange::empty(range_id);

        let mut cmd = create_cmd(tenant_id, range_id, 1, 10);
        cmd.expires_on = None;
        let err = range
            .handle(&RangeCommand::CreateRange(cmd.clone()))
            .unwrap_err();
        assert_eq!(err, RangeError::MissingExpiration(DocumentType::FiscalCredit));

        cmd.document_type = DocumentType::CreditNote;
        assert!(range.handle(&RangeCommand::CreateRange(cmd)).is_ok());
    }

    #[test]
    fn issues_one_two_three_then_exhausts() {
        let (mut range, tenant_id) = active_range(1, 3);

        assert_eq!(issue(&mut range, tenant_id).unwrap(), 1);
        assert_eq!(issue(&mut range, tenant_id).unwrap(), 2);
        assert_eq!(range.status(), RangeStatus::Active);
        assert_eq!(issue(&mut range, tenant_id).unwrap(), 3);
        assert_eq!(range.status(), RangeStatus::Exhausted);

        let err = issue(&mut range, tenant_id).unwrap_err();
        assert!(matches!(err, RangeError::Exhausted { cursor: 3, upper: 3, .. }));
        assert_eq!(range.status(), RangeStatus::Exhausted);
        assert_eq!(range.cursor(), 3);
    }

    #[test]
    fn draft_range_does_not_issue() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        execute(
            &mut range,
            &RangeCommand::CreateRange(create_cmd(tenant_id, range_id, 1, 3)),
        )
        .unwrap();

        let err = issue(&mut range, tenant_id).unwrap_err();
        assert!(matches!(
            err,
            RangeError::NotActive { status: RangeStatus::Draft, .. }
        ));
        assert_eq!(range.cursor(), 0);
    }

    #[test]
    fn activation_after_expiration_is_rejected() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        let mut cmd = create_cmd(tenant_id, range_id, 1, 10);
        cmd.expires_on = Some(day(2025, 6, 30));
        execute(&mut range, &RangeCommand::CreateRange(cmd)).unwrap();

        let err = range
            .handle(&RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id,
                today: day(2025, 7, 1),
                active_peers: vec![],
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, RangeError::AlreadyExpired { .. }));
        assert_eq!(range.status(), RangeStatus::Draft);
    }

    #[test]
    fn activation_on_the_expiration_day_succeeds() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        let mut cmd = create_cmd(tenant_id, range_id, 1, 10);
        cmd.expires_on = Some(day(2025, 6, 30));
        execute(&mut range, &RangeCommand::CreateRange(cmd)).unwrap();

        execute(
            &mut range,
            &RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id,
                today: day(2025, 6, 30),
                active_peers: vec![],
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(range.status(), RangeStatus::Active);
    }

    #[test]
    fn credit_note_range_past_its_date_neither_activates_nor_escapes_expiry() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        let mut cmd = create_cmd(tenant_id, range_id, 1, 10);
        cmd.document_type = DocumentType::CreditNote;
        cmd.expires_on = Some(day(2020, 1, 1));
        execute(&mut range, &RangeCommand::CreateRange(cmd)).unwrap();

        let activate = |today| {
            RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id,
                today,
                active_peers: vec![],
                occurred_at: now(),
            })
        };
        let err = range.handle(&activate(day(2026, 3, 1))).unwrap_err();
        assert!(matches!(err, RangeError::AlreadyExpired { .. }));

        execute(&mut range, &activate(day(2019, 12, 1))).unwrap();
        assert!(!range.is_stale_for_issuance(day(2026, 3, 1)));

        execute(
            &mut range,
            &RangeCommand::ExpireRange(ExpireRange {
                tenant_id,
                range_id,
                as_of: day(2026, 3, 1),
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(range.status(), RangeStatus::Expired);
    }

    #[test]
    fn activation_rejects_overlap_with_active_peer() {
        let tenant_id = TenantId::new();
        let range_id = RangeId::new(AggregateId::new());
        let mut range = SequenceRange::empty(range_id);
        execute(
            &mut range,
            &RangeCommand::CreateRange(create_cmd(tenant_id, range_id, 50, 150)),
        )
        .unwrap();

        let peer = PeerRange {
            range_id: RangeId::new(AggregateId::new()),
            lower: 1,
            upper: 50,
        };
        let err = range
            .handle(&RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id,
                today: day(2026, 1, 1),
                active_peers: vec![peer],
                occurred_at: now(),
            }))
            .unwrap_err();
        match err {
            RangeError::Overlap { other, other_upper, .. } => {
                assert_eq!(other, peer.range_id);
                assert_eq!(other_upper, 50);
            }
            other => panic!("expected overlap, got {other:?}"),
        }
    }

    #[test]
    fn activating_twice_is_invalid_state() {
        let (range, tenant_id) = active_range(1, 10);
        let err = range
            .handle(&RangeCommand::ActivateRange(ActivateRange {
                tenant_id,
                range_id: range.id_typed(),
                today: day(2026, 1, 1),
                active_peers: vec![],
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            RangeError::InvalidState { action: "activate", status: RangeStatus::Active, .. }
        ));
    }

    #[test]
    fn void_rejected_once_exhausted() {
        let (mut range, tenant_id) = active_range(1, 1);
        issue(&mut range, tenant_id).unwrap();

        let err = range
            .handle(&RangeCommand::VoidRange(VoidRange {
                tenant_id,
                range_id: range.id_typed(),
                reason: None,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            RangeError::InvalidState { status: RangeStatus::Exhausted, action: "void", .. }
        ));
    }

    #[test]
    fn voided_range_stops_issuing() {
        let (mut range, tenant_id) = active_range(1, 10);
        let range_id = range.id_typed();
        execute(
            &mut range,
            &RangeCommand::VoidRange(VoidRange {
                tenant_id,
                range_id,
                reason: Some("replaced".to_string()),
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(range.status(), RangeStatus::Voided);
        assert!(matches!(
            issue(&mut range, tenant_id),
            Err(RangeError::NotActive { status: RangeStatus::Voided, .. })
        ));
    }

    #[test]
    fn expire_is_idempotent_and_skips_ranges_not_due() {
        let (mut range, tenant_id) = active_range(1, 10);
        let range_id = range.id_typed();
        let expire = |as_of| {
            RangeCommand::ExpireRange(ExpireRange {
                tenant_id,
                range_id,
                as_of,
                occurred_at: now(),
            })
        };

        let not_due = expire(day(2026, 12, 31));
        assert!(execute(&mut range, &not_due).unwrap().is_empty());

        let due = expire(day(2027, 1, 1));
        assert_eq!(execute(&mut range, &due).unwrap().len(), 1);
        assert_eq!(range.status(), RangeStatus::Expired);
        assert!(execute(&mut range, &due).unwrap().is_empty());
    }

    #[test]
    fn revise_only_in_draft() {
        let (range, tenant_id) = active_range(1, 10);
        let err = range
            .handle(&RangeCommand::ReviseRange(ReviseRange {
                tenant_id,
                range_id: range.id_typed(),
                name: "x".to_string(),
                lower: 1,
                upper: 20,
                expires_on: Some(day(2026, 12, 31)),
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, RangeError::InvalidState { action: "revise", .. }));
    }

    #[test]
    fn metrics_track_usage() {
        let (mut range, tenant_id) = active_range(1, 4);
        issue(&mut range, tenant_id).unwrap();

        assert_eq!(range.issued(), 1);
        assert_eq!(range.remaining(), 3);
        assert!((range.percent_used() - 25.0).abs() < f64::EPSILON);
        assert_eq!(range.days_to_expiry(day(2026, 12, 30)), Some(1));
        assert_eq!(
            range.encf_for(1).unwrap().to_string(),
            "E310000000001"
        );
    }

    proptest! {
        #[test]
        fn issuance_is_sequential_and_gap_free(lower in 1u64..1_000_000, n in 1u64..64) {
            let (mut range, tenant_id) = active_range(lower, lower + 63);

            let issued: Vec<u64> = (0..n).map(|_| issue(&mut range, tenant_id).unwrap()).collect();
            let expected: Vec<u64> = (lower..lower + n).collect();

            prop_assert_eq!(issued, expected);
            prop_assert_eq!(range.cursor(), lower + n - 1);
        }
    }
}
