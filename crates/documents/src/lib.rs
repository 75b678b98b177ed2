//! `ecf-documents`: fiscal documents as seen by numbering and the regulator.
//!
//! Only what numbering, submission tracking and the credit reactions need is
//! modelled here; line items, taxes and payload shaping live elsewhere.

pub mod document;
pub mod error;

pub use document::{
    AssignNumber, CancelDocument, DocumentCancelled, DocumentCommand, DocumentEvent, DocumentKind,
    DocumentReference, DocumentRegistered, DocumentState, DocumentSubmitted, FiscalDocument,
    MarkSubmitted, NumberAssigned, RecordRegulatorStatus, RegisterDocument, RegulatorStatus,
    RegulatorStatusRecorded,
};
pub use error::DocumentError;
