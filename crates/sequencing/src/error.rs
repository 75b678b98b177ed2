use chrono::NaiveDate;
use thiserror::Error;

use ecf_core::DomainError;

use crate::document_type::DocumentType;
use crate::range::{RangeId, RangeStatus};

/// Rejection raised by a [`SequenceRange`](crate::SequenceRange) command.
///
/// `NotActive`, `Exhausted`, `AlreadyExpired` and `InvalidState` are fixed by
/// operator reconfiguration (activate another range, request a new block).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("range {range_id} is not active (status: {status})")]
    NotActive { range_id: RangeId, status: RangeStatus },

    #[error("range {range_id} is exhausted (cursor {cursor} reached upper bound {upper})")]
    Exhausted { range_id: RangeId, cursor: u64, upper: u64 },

    #[error("range {range_id} expired on {expires_on}, cannot activate on {today}")]
    AlreadyExpired {
        range_id: RangeId,
        expires_on: NaiveDate,
        today: NaiveDate,
    },

    #[error("cannot {action} range {range_id} in status {status}")]
    InvalidState {
        range_id: RangeId,
        status: RangeStatus,
        action: &'static str,
    },

    #[error("range {range_id} [{lower}, {upper}] overlaps active range {other} [{other_lower}, {other_upper}]")]
    Overlap {
        range_id: RangeId,
        lower: u64,
        upper: u64,
        other: RangeId,
        other_lower: u64,
        other_upper: u64,
    },

    #[error("invalid bounds [{lower}, {upper}]: {reason}")]
    InvalidBounds {
        lower: u64,
        upper: u64,
        reason: &'static str,
    },

    #[error("ranges of type {0} require an expiration date")]
    MissingExpiration(DocumentType),

    #[error("range already exists")]
    AlreadyExists,

    #[error("range not found")]
    NotFound,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RangeError {
    /// Errors an operator resolves by reconfiguring ranges rather than by retrying.
    pub fn is_operator_recoverable(&self) -> bool {
        matches!(
            self,
            RangeError::NotActive { .. }
                | RangeError::Exhausted { .. }
                | RangeError::AlreadyExpired { .. }
                | RangeError::InvalidState { .. }
        )
    }
}
