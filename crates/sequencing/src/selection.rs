//! Pure range-pool queries used by the allocator.

use chrono::NaiveDate;

use crate::document_type::DocumentType;
use crate::location::IssuingLocation;
use crate::range::{PeerRange, RangeStatus, SequenceRange};
use ecf_core::AggregateRoot;

/// Closed intervals `[a_lower, a_upper]` and `[b_lower, b_upper]` share a number.
pub fn overlaps(a_lower: u64, a_upper: u64, b_lower: u64, b_upper: u64) -> bool {
    a_lower <= b_upper && b_lower <= a_upper
}

/// Pick the range that should number the next document.
///
/// Candidates are active, have capacity and (except credit notes) are not past
/// their expiration as of `as_of`. The lowest cursor wins; ties go to the
/// lowest lower bound so the choice is deterministic.
pub fn select_for_issuance<'a, I>(
    ranges: I,
    document_type: DocumentType,
    location: &IssuingLocation,
    as_of: NaiveDate,
) -> Option<&'a SequenceRange>
where
    I: IntoIterator<Item = &'a SequenceRange>,
{
    ranges
        .into_iter()
        .filter(|r| r.document_type() == document_type)
        .filter(|r| r.location() == Some(location))
        .filter(|r| r.status() == RangeStatus::Active && r.has_capacity())
        .filter(|r| !r.is_stale_for_issuance(as_of))
        .min_by_key(|r| (r.cursor(), r.lower()))
}

/// Active ranges sharing `subject`'s type and location, excluding `subject` itself.
pub fn active_peers<'a, I>(ranges: I, subject: &SequenceRange) -> Vec<PeerRange>
where
    I: IntoIterator<Item = &'a SequenceRange>,
{
    ranges
        .into_iter()
        .filter(|r| r.id() != subject.id())
        .filter(|r| r.document_type() == subject.document_type())
        .filter(|r| r.location() == subject.location())
        .filter(|r| matches!(r.status(), RangeStatus::Active | RangeStatus::Exhausted))
        .map(|r| PeerRange {
            range_id: r.id_typed(),
            lower: r.lower(),
            upper: r.upper(),
        })
        .collect()
}
