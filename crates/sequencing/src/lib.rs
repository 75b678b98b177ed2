//! `ecf-sequencing`: fiscal number ranges and e-NCF formatting.
//!
//! A [`SequenceRange`] is a regulator-authorized block of numbers for one
//! document type at one issuing location. Numbers are issued strictly in
//! order, without gaps, until the range is exhausted, expires or is voided.

pub mod document_type;
pub mod encf;
pub mod error;
pub mod location;
pub mod range;
pub mod selection;

pub use document_type::DocumentType;
pub use encf::Encf;
pub use error::RangeError;
pub use location::IssuingLocation;
pub use range::{
    ActivateRange, CreateRange, ExpireRange, IssueSequence, PeerRange, RangeActivated,
    RangeCommand, RangeCreated, RangeEvent, RangeExpired, RangeId, RangeRevised, RangeStatus,
    RangeVoided, ReviseRange, SequenceIssued, SequenceRange, VoidRange,
};
pub use selection::{active_peers, overlaps, select_for_issuance};
