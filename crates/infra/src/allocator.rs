//! Sequence-range allocator: the only entry point that moves a range cursor.
//!
//! Every mutation of a range runs under that range's record lock and is
//! dispatched against the live event stream, so two requests can never hand
//! out the same number. Contention fails immediately with
//! [`AllocationError::ResourceBusy`]; there are no retries here.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use ecf_core::{AggregateId, TenantId};
use ecf_sequencing::{
    ActivateRange, CreateRange, DocumentType, Encf, ExpireRange, IssueSequence, IssuingLocation,
    RangeCommand, RangeError, RangeEvent, RangeId, RangeStatus, ReviseRange, SequenceRange,
    VoidRange, active_peers, overlaps, select_for_issuance,
};

use crate::command_dispatcher::{DispatchError, Dispatcher};
use crate::event_store::EventStoreError;
use crate::locks::{LockBusy, LockKey, RecordLocks};
use crate::read_model::{InMemoryTenantStore, TenantStore, rebuild};

pub const RANGE_AGGREGATE: &str = "sequencing.range";

pub type RangeRegistry = InMemoryTenantStore<RangeId, SequenceRange>;

#[derive(Debug, Error)]
pub enum AllocationError {
    /// Another request holds the range (or its pool); retry later.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error(transparent)]
    Range(RangeError),

    #[error("range {0} not found")]
    RangeNotFound(RangeId),

    #[error("no active range with capacity for type {document_type} at {location}")]
    NoActiveRange {
        document_type: DocumentType,
        location: IssuingLocation,
    },

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<LockBusy> for AllocationError {
    fn from(value: LockBusy) -> Self {
        AllocationError::ResourceBusy(value.to_string())
    }
}

impl From<DispatchError<RangeError>> for AllocationError {
    fn from(value: DispatchError<RangeError>) -> Self {
        match value {
            DispatchError::Busy(msg) => AllocationError::ResourceBusy(msg),
            DispatchError::Rejected(err) => AllocationError::Range(err),
            other => AllocationError::Infrastructure(other.to_string()),
        }
    }
}

impl From<EventStoreError> for AllocationError {
    fn from(value: EventStoreError) -> Self {
        AllocationError::Infrastructure(value.to_string())
    }
}

/// Operator input for a new range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRange {
    pub name: String,
    pub document_type: DocumentType,
    pub location: IssuingLocation,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
}

/// Operator edit of a draft range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRevision {
    pub name: String,
    pub lower: u64,
    pub upper: u64,
    pub expires_on: Option<NaiveDate>,
}

/// A number handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub range_id: RangeId,
    pub number: u64,
    pub encf: Encf,
    /// This allocation used the last number of the range.
    pub exhausted: bool,
}

pub struct SequenceAllocator {
    dispatcher: Arc<Dispatcher>,
    locks: Arc<RecordLocks>,
    registry: Arc<RangeRegistry>,
}

impl SequenceAllocator {
    pub fn new(dispatcher: Arc<Dispatcher>, locks: Arc<RecordLocks>) -> Self {
        Self {
            dispatcher,
            locks,
            registry: Arc::new(RangeRegistry::new()),
        }
    }

    /// Reload the range registry from the event store.
    pub fn rebuild(&self) -> Result<usize, AllocationError> {
        let restored = rebuild(
            self.dispatcher.store(),
            RANGE_AGGREGATE,
            &*self.registry,
            |id| SequenceRange::empty(RangeId::new(id)),
            |r| r.id_typed(),
        )?;
        info!(restored, "range registry rebuilt");
        Ok(restored)
    }

    pub fn get(&self, tenant_id: TenantId, range_id: RangeId) -> Option<SequenceRange> {
        self.registry.get(tenant_id, &range_id)
    }

    /// All ranges of a tenant ordered by type, location and lower bound.
    pub fn list(&self, tenant_id: TenantId) -> Vec<SequenceRange> {
        let mut ranges = self.registry.list(tenant_id);
        ranges.sort_by(|a, b| {
            (a.document_type().code(), a.location(), a.lower())
                .cmp(&(b.document_type().code(), b.location(), b.lower()))
        });
        ranges
    }

    #[instrument(
        skip(self, input),
        fields(tenant_id = %tenant_id, document_type = %input.document_type)
    )]
    pub fn create(
        &self,
        tenant_id: TenantId,
        input: NewRange,
        now: DateTime<Utc>,
    ) -> Result<SequenceRange, AllocationError> {
        let range_id = RangeId::new(AggregateId::new());
        self.reject_active_overlap(
            tenant_id,
            range_id,
            input.document_type,
            &input.location,
            input.lower,
            input.upper,
        )?;
        let command = RangeCommand::CreateRange(CreateRange {
            tenant_id,
            range_id,
            name: input.name,
            document_type: input.document_type,
            location: input.location,
            lower: input.lower,
            upper: input.upper,
            expires_on: input.expires_on,
            occurred_at: now,
        });

        let range = self.run(tenant_id, range_id, &command)?;
        info!(range_id = %range_id, lower = range.lower(), upper = range.upper(), "range created");
        Ok(range)
    }

    #[instrument(skip(self, revision), fields(tenant_id = %tenant_id, range_id = %range_id))]
    pub fn revise(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        revision: RangeRevision,
        now: DateTime<Utc>,
    ) -> Result<SequenceRange, AllocationError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, range_id.0))?;
        let current = self.require(tenant_id, range_id)?;
        if let Some(location) = current.location() {
            self.reject_active_overlap(
                tenant_id,
                range_id,
                current.document_type(),
                location,
                revision.lower,
                revision.upper,
            )?;
        }
        let command = RangeCommand::ReviseRange(ReviseRange {
            tenant_id,
            range_id,
            name: revision.name,
            lower: revision.lower,
            upper: revision.upper,
            expires_on: revision.expires_on,
            occurred_at: now,
        });
        self.run(tenant_id, range_id, &command)
    }

    /// Activate a draft range. Holds the pool lock so two overlapping drafts
    /// cannot be activated side by side.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, range_id = %range_id))]
    pub fn activate(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SequenceRange, AllocationError> {
        let range = self.require(tenant_id, range_id)?;
        let location = range
            .location()
            .cloned()
            .ok_or(AllocationError::RangeNotFound(range_id))?;

        let _pool = self
            .locks
            .try_lock(LockKey::pool(tenant_id, range.document_type(), location))?;
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, range_id.0))?;

        let ranges = self.registry.list(tenant_id);
        let command = RangeCommand::ActivateRange(ActivateRange {
            tenant_id,
            range_id,
            today,
            active_peers: active_peers(&ranges, &range),
            occurred_at: now,
        });

        let range = self.run(tenant_id, range_id, &command)?;
        info!(range_id = %range_id, "range activated");
        Ok(range)
    }

    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, range_id = %range_id))]
    pub fn void(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SequenceRange, AllocationError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, range_id.0))?;
        let command = RangeCommand::VoidRange(VoidRange {
            tenant_id,
            range_id,
            reason,
            occurred_at: now,
        });

        let range = self.run(tenant_id, range_id, &command)?;
        info!(range_id = %range_id, "range voided");
        Ok(range)
    }

    /// The range that should number the next document of this type at this
    /// location, if any.
    pub fn find_active_range(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        location: &IssuingLocation,
        as_of: NaiveDate,
    ) -> Option<SequenceRange> {
        let ranges = self.registry.list(tenant_id);
        select_for_issuance(&ranges, document_type, location, as_of).cloned()
    }

    /// Issue the next number of `range_id`.
    ///
    /// The cursor check and increment happen on the live stream under the
    /// range lock; the append's expected version rejects a writer that raced
    /// from another process.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, range_id = %range_id))]
    pub fn next_sequence(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, AllocationError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, range_id.0))?;

        let command = RangeCommand::IssueSequence(IssueSequence {
            tenant_id,
            range_id,
            occurred_at: now,
        });
        let out = self
            .dispatcher
            .dispatch(tenant_id, range_id.0, RANGE_AGGREGATE, &command, |id| {
                SequenceRange::empty(RangeId::new(id))
            })
            .map_err(|err| self.refresh_on_rejection(tenant_id, range_id, err))?;

        let range = out.aggregate;
        if !range.is_created() {
            return Err(AllocationError::RangeNotFound(range_id));
        }

        let (number, exhausted) = out
            .events
            .iter()
            .find_map(|ev| match ev {
                RangeEvent::SequenceIssued(e) => Some((e.number, e.exhausted)),
                _ => None,
            })
            .ok_or_else(|| AllocationError::Infrastructure("issue decided no number".to_string()))?;

        let encf = range
            .encf_for(number)
            .map_err(|e| AllocationError::Range(RangeError::Domain(e)))?;

        self.registry.upsert(tenant_id, range_id, range);

        if exhausted {
            info!(range_id = %range_id, number, "range exhausted");
        } else {
            debug!(range_id = %range_id, number, "sequence issued");
        }

        Ok(Allocation {
            range_id,
            number,
            encf,
            exhausted,
        })
    }

    /// Select the active range for the key and issue its next number.
    pub fn allocate(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        location: &IssuingLocation,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Allocation, AllocationError> {
        let range = self
            .find_active_range(tenant_id, document_type, location, as_of)
            .ok_or_else(|| AllocationError::NoActiveRange {
                document_type,
                location: location.clone(),
            })?;
        self.next_sequence(tenant_id, range.id_typed(), now)
    }

    /// Flip every active range of every tenant whose expiration is strictly
    /// before `as_of` to expired. Returns how many flipped.
    ///
    /// A range that is busy is skipped and picked up by the next sweep.
    #[instrument(skip(self))]
    pub fn expire_due_ranges(&self, as_of: NaiveDate, now: DateTime<Utc>) -> usize {
        self.registry
            .tenants()
            .into_iter()
            .map(|tenant_id| self.expire_due_ranges_for(tenant_id, as_of, now))
            .sum()
    }

    pub fn expire_due_ranges_for(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> usize {
        let due: Vec<RangeId> = self
            .registry
            .list(tenant_id)
            .iter()
            .filter(|r| r.status() == RangeStatus::Active && r.is_past_expiration(as_of))
            .map(|r| r.id_typed())
            .collect();

        let mut expired = 0;
        for range_id in due {
            match self.expire_one(tenant_id, range_id, as_of, now) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        tenant_id = %tenant_id,
                        range_id = %range_id,
                        error = %err,
                        "range expiry skipped"
                    );
                }
            }
        }

        if expired > 0 {
            info!(tenant_id = %tenant_id, expired, as_of = %as_of, "ranges expired");
        }
        expired
    }

    fn expire_one(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, AllocationError> {
        let _guard = self.locks.try_lock(LockKey::record(tenant_id, range_id.0))?;
        let command = RangeCommand::ExpireRange(ExpireRange {
            tenant_id,
            range_id,
            as_of,
            occurred_at: now,
        });
        let out = self.dispatcher.dispatch(tenant_id, range_id.0, RANGE_AGGREGATE, &command, |id| {
            SequenceRange::empty(RangeId::new(id))
        })?;
        let flipped = !out.events.is_empty();
        self.registry.upsert(tenant_id, range_id, out.aggregate);
        Ok(flipped)
    }

    /// Early answer for create and revise: bounds that collide with an active
    /// range of the same pool are refused before anything is written.
    /// Activation repeats the check under the pool lock.
    fn reject_active_overlap(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        document_type: DocumentType,
        location: &IssuingLocation,
        lower: u64,
        upper: u64,
    ) -> Result<(), AllocationError> {
        if lower > upper {
            return Ok(());
        }
        let clash = self.registry.list(tenant_id).into_iter().find(|r| {
            r.id_typed() != range_id
                && r.document_type() == document_type
                && r.location() == Some(location)
                && matches!(r.status(), RangeStatus::Active | RangeStatus::Exhausted)
                && overlaps(lower, upper, r.lower(), r.upper())
        });
        match clash {
            Some(other) => Err(AllocationError::Range(RangeError::Overlap {
                range_id,
                lower,
                upper,
                other: other.id_typed(),
                other_lower: other.lower(),
                other_upper: other.upper(),
            })),
            None => Ok(()),
        }
    }

    fn require(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
    ) -> Result<SequenceRange, AllocationError> {
        self.registry
            .get(tenant_id, &range_id)
            .ok_or(AllocationError::RangeNotFound(range_id))
    }

    fn run(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        command: &RangeCommand,
    ) -> Result<SequenceRange, AllocationError> {
        let out = self
            .dispatcher
            .dispatch(tenant_id, range_id.0, RANGE_AGGREGATE, command, |id| {
                SequenceRange::empty(RangeId::new(id))
            })
            .map_err(|err| match err {
                DispatchError::Rejected(RangeError::NotFound) => {
                    AllocationError::RangeNotFound(range_id)
                }
                other => other.into(),
            })?;
        self.registry.upsert(tenant_id, range_id, out.aggregate.clone());
        Ok(out.aggregate)
    }

    /// A rejected issue still tells us the live state; keep the registry
    /// honest so selection stops offering an exhausted or retired range.
    fn refresh_on_rejection(
        &self,
        tenant_id: TenantId,
        range_id: RangeId,
        err: DispatchError<RangeError>,
    ) -> AllocationError {
        if let DispatchError::Rejected(RangeError::NotFound) = err {
            return AllocationError::RangeNotFound(range_id);
        }
        if let DispatchError::Rejected(rejection) = &err {
            if rejection.is_operator_recoverable() {
                warn!(
                    tenant_id = %tenant_id,
                    range_id = %range_id,
                    error = %rejection,
                    "range cannot issue until an operator reconfigures it"
                );
            }
        }
        if matches!(err, DispatchError::Rejected(_) | DispatchError::Busy(_)) {
            if let Ok(live) = self.dispatcher.load(tenant_id, range_id.0, |id| {
                SequenceRange::empty(RangeId::new(id))
            }) {
                if live.is_created() {
                    self.registry.upsert(tenant_id, range_id, live);
                }
            }
        }
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use ecf_events::InMemoryEventBus;
    use proptest::prelude::*;

    fn allocator() -> SequenceAllocator {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store, Arc::new(InMemoryEventBus::new())));
        SequenceAllocator::new(dispatcher, Arc::new(RecordLocks::new()))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn location() -> IssuingLocation {
        IssuingLocation::new("001", "001").unwrap()
    }

    fn new_range(lower: u64, upper: u64) -> NewRange {
        NewRange {
            name: format!("E31 {lower}-{upper}"),
            document_type: DocumentType::FiscalCredit,
            location: location(),
            lower,
            upper,
            expires_on: NaiveDate::from_ymd_opt(2027, 12, 31),
        }
    }

    fn active(a: &SequenceAllocator, tenant_id: TenantId, lower: u64, upper: u64) -> RangeId {
        let range = a.create(tenant_id, new_range(lower, upper), Utc::now()).unwrap();
        a.activate(tenant_id, range.id_typed(), today(), Utc::now()).unwrap();
        range.id_typed()
    }

    #[test]
    fn three_numbers_then_exhausted() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let range_id = active(&a, tenant_id, 1, 3);

        let numbers: Vec<u64> = (0..3)
            .map(|_| a.next_sequence(tenant_id, range_id, Utc::now()).unwrap().number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(a.get(tenant_id, range_id).unwrap().status(), RangeStatus::Exhausted);

        let err = a.next_sequence(tenant_id, range_id, Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::Exhausted { .. })));
        assert_eq!(a.get(tenant_id, range_id).unwrap().status(), RangeStatus::Exhausted);
    }

    #[test]
    fn allocation_carries_the_fiscal_number() {
        let a = allocator();
        let tenant_id = TenantId::new();
        active(&a, tenant_id, 41, 50);

        let allocation = a
            .allocate(tenant_id, DocumentType::FiscalCredit, &location(), today(), Utc::now())
            .unwrap();
        assert_eq!(allocation.number, 41);
        assert_eq!(allocation.encf.to_string(), "E310000000041");
    }

    #[test]
    fn busy_range_fails_fast() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let range_id = active(&a, tenant_id, 1, 10);

        let _held = a.locks.try_lock(LockKey::record(tenant_id, range_id.0)).unwrap();
        let err = a.next_sequence(tenant_id, range_id, Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::ResourceBusy(_)));
        assert_eq!(a.get(tenant_id, range_id).unwrap().cursor(), 0);
    }

    #[test]
    fn draft_range_is_not_issued_from() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let range = a.create(tenant_id, new_range(1, 10), Utc::now()).unwrap();

        let err = a.next_sequence(tenant_id, range.id_typed(), Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::NotActive { .. })));
        assert!(matches!(
            a.allocate(tenant_id, DocumentType::FiscalCredit, &location(), today(), Utc::now()),
            Err(AllocationError::NoActiveRange { .. })
        ));
    }

    #[test]
    fn overlapping_activation_is_rejected() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let first = a.create(tenant_id, new_range(1, 100), Utc::now()).unwrap();
        let draft = a.create(tenant_id, new_range(50, 150), Utc::now()).unwrap();
        a.activate(tenant_id, first.id_typed(), today(), Utc::now()).unwrap();

        let err = a.activate(tenant_id, draft.id_typed(), today(), Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::Overlap { .. })));

        let err = a.create(tenant_id, new_range(90, 120), Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::Overlap { .. })));

        let mut revision = RangeRevision {
            name: "moved".to_string(),
            lower: 100,
            upper: 160,
            expires_on: NaiveDate::from_ymd_opt(2027, 12, 31),
        };
        let err = a.revise(tenant_id, draft.id_typed(), revision.clone(), Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::Overlap { .. })));
        revision.lower = 101;
        a.revise(tenant_id, draft.id_typed(), revision, Utc::now()).unwrap();
        a.activate(tenant_id, draft.id_typed(), today(), Utc::now()).unwrap();

        let other_tenant = TenantId::new();
        active(&a, other_tenant, 50, 150);
    }

    #[test]
    fn lowest_cursor_is_selected_and_exhausted_ranges_are_skipped() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let first = active(&a, tenant_id, 1, 1);
        let second = active(&a, tenant_id, 101, 200);

        let one = a
            .allocate(tenant_id, DocumentType::FiscalCredit, &location(), today(), Utc::now())
            .unwrap();
        assert_eq!((one.range_id, one.number), (first, 1));
        assert!(one.exhausted);

        let two = a
            .allocate(tenant_id, DocumentType::FiscalCredit, &location(), today(), Utc::now())
            .unwrap();
        assert_eq!((two.range_id, two.number), (second, 101));
    }

    #[test]
    fn sweep_expires_only_due_ranges_and_is_idempotent() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let due = active(&a, tenant_id, 1, 10);
        let mut later = new_range(11, 20);
        later.expires_on = NaiveDate::from_ymd_opt(2030, 1, 1);
        let later = a.create(tenant_id, later, Utc::now()).unwrap();
        a.activate(tenant_id, later.id_typed(), today(), Utc::now()).unwrap();

        let as_of = NaiveDate::from_ymd_opt(2028, 1, 1).unwrap();
        assert_eq!(a.expire_due_ranges(as_of, Utc::now()), 1);
        assert_eq!(a.expire_due_ranges(as_of, Utc::now()), 0);
        assert_eq!(a.get(tenant_id, due).unwrap().status(), RangeStatus::Expired);
        assert_eq!(a.get(tenant_id, later.id_typed()).unwrap().status(), RangeStatus::Active);
    }

    #[test]
    fn credit_note_ranges_follow_the_same_expiry_rules() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let note_range = |lower, upper, expires_on| NewRange {
            name: format!("E34 {lower}-{upper}"),
            document_type: DocumentType::CreditNote,
            location: location(),
            lower,
            upper,
            expires_on,
        };

        let stale = a
            .create(tenant_id, note_range(1, 10, NaiveDate::from_ymd_opt(2020, 1, 1)), Utc::now())
            .unwrap();
        let err = a.activate(tenant_id, stale.id_typed(), today(), Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::AlreadyExpired { .. })));

        let dated = a
            .create(tenant_id, note_range(11, 20, NaiveDate::from_ymd_opt(2026, 6, 30)), Utc::now())
            .unwrap();
        a.activate(tenant_id, dated.id_typed(), today(), Utc::now()).unwrap();
        let undated = a.create(tenant_id, note_range(21, 30, None), Utc::now()).unwrap();
        a.activate(tenant_id, undated.id_typed(), today(), Utc::now()).unwrap();

        let as_of = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        assert_eq!(a.expire_due_ranges_for(tenant_id, as_of, Utc::now()), 1);
        assert_eq!(a.get(tenant_id, dated.id_typed()).unwrap().status(), RangeStatus::Expired);
        assert_eq!(a.get(tenant_id, undated.id_typed()).unwrap().status(), RangeStatus::Active);
    }

    #[test]
    fn concurrent_callers_share_the_range_without_gaps_or_duplicates() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let (lower, upper) = (500u64, 899u64);
        let range_id = active(&a, tenant_id, lower, upper);

        let barrier = std::sync::Barrier::new(8);
        let mut issued: Vec<u64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let mut mine = Vec::new();
                        loop {
                            match a.next_sequence(tenant_id, range_id, Utc::now()) {
                                Ok(allocation) => mine.push(allocation.number),
                                Err(AllocationError::ResourceBusy(_)) => std::thread::yield_now(),
                                Err(AllocationError::Range(RangeError::Exhausted { .. })) => break,
                                Err(other) => panic!("unexpected allocation error: {other}"),
                            }
                        }
                        mine
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        issued.sort_unstable();
        assert_eq!(issued, (lower..=upper).collect::<Vec<_>>());
        assert_eq!(a.get(tenant_id, range_id).unwrap().status(), RangeStatus::Exhausted);
    }

    #[test]
    fn void_after_exhaustion_is_invalid() {
        let a = allocator();
        let tenant_id = TenantId::new();
        let range_id = active(&a, tenant_id, 5, 5);
        a.next_sequence(tenant_id, range_id, Utc::now()).unwrap();

        let err = a.void(tenant_id, range_id, None, Utc::now()).unwrap_err();
        assert!(matches!(err, AllocationError::Range(RangeError::InvalidState { .. })));
    }

    #[test]
    fn registry_survives_rebuild() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store, Arc::new(InMemoryEventBus::new())));
        let tenant_id = TenantId::new();

        let first = SequenceAllocator::new(dispatcher.clone(), Arc::new(RecordLocks::new()));
        let range_id = active(&first, tenant_id, 1, 10);
        first.next_sequence(tenant_id, range_id, Utc::now()).unwrap();

        let restarted = SequenceAllocator::new(dispatcher, Arc::new(RecordLocks::new()));
        assert_eq!(restarted.rebuild().unwrap(), 1);
        let next = restarted.next_sequence(tenant_id, range_id, Utc::now()).unwrap();
        assert_eq!(next.number, 2);
    }

    proptest! {
        #[test]
        fn issuance_is_sequential_and_gap_free(
            lower in 1u64..10_000,
            size in 1u64..40,
            calls in 0usize..40,
        ) {
            let a = allocator();
            let tenant_id = TenantId::new();
            let upper = lower + size - 1;
            let range_id = active(&a, tenant_id, lower, upper);

            let n = calls.min(size as usize);
            let issued: Vec<u64> = (0..n)
                .map(|_| a.next_sequence(tenant_id, range_id, Utc::now()).unwrap().number)
                .collect();

            let expected: Vec<u64> = (lower..lower + n as u64).collect();
            prop_assert_eq!(issued, expected);
            prop_assert_eq!(a.get(tenant_id, range_id).unwrap().cursor(), lower + n as u64 - 1);
        }
    }
}
