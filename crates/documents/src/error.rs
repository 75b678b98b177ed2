use thiserror::Error;

use ecf_core::{DocumentId, DomainError, Money};
use ecf_sequencing::{DocumentType, Encf};

use crate::document::DocumentState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("document already registered")]
    AlreadyExists,

    #[error("document not found")]
    NotFound,

    #[error("document {document_id} already numbered as {encf}")]
    AlreadyNumbered { document_id: DocumentId, encf: Encf },

    #[error("document {document_id} has no e-NCF yet")]
    NotNumbered { document_id: DocumentId },

    #[error("document {document_id} has not been submitted")]
    NotSubmitted { document_id: DocumentId },

    #[error("document {document_id} is cancelled")]
    Cancelled { document_id: DocumentId },

    #[error("cannot {action} document {document_id} in state {state:?}")]
    InvalidState {
        document_id: DocumentId,
        state: DocumentState,
        action: &'static str,
    },

    #[error("e-NCF {encf} does not match document type {document_type}")]
    TypeMismatch {
        document_type: DocumentType,
        encf: Encf,
    },

    #[error("document type {0} requires the buyer RNC or cédula")]
    MissingBuyerRnc(DocumentType),

    #[error("buyer RNC '{0}' must have 9 (RNC) or 11 (cédula) digits")]
    InvalidBuyerRnc(String),

    #[error("document type {0} must reference the document it modifies")]
    MissingReference(DocumentType),

    #[error("credit note total {total} exceeds {creditable} still creditable on document {reference}")]
    ExceedsReferencedTotal {
        reference: DocumentId,
        total: Money,
        creditable: Money,
    },

    #[error("document total {0} must be greater than zero")]
    InvalidTotal(Money),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
