use thiserror::Error;

use ecf_core::{DocumentId, DomainError, Money, PartnerId};

use crate::application::ApplicationId;
use crate::credit::CreditId;

/// Ledger rejection. Every variant names the record and the values involved so
/// it can be shown to the operator as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    #[error("credit {credit_id} is void")]
    Voided { credit_id: CreditId },

    #[error("credit {credit_id} is fully consumed")]
    Consumed { credit_id: CreditId },

    #[error("amount {amount} for credit {credit_id} must be greater than zero")]
    InvalidAmount { credit_id: CreditId, amount: Money },

    #[error("credit {credit_id} has {available} available, {requested} requested")]
    InsufficientBalance {
        credit_id: CreditId,
        available: Money,
        requested: Money,
    },

    #[error("credit {credit_id} belongs to partner {credit_owner}, invoice belongs to {invoice_owner}")]
    OwnerMismatch {
        credit_id: CreditId,
        credit_owner: PartnerId,
        invoice_owner: PartnerId,
    },

    #[error("invoice {invoice_id} has {outstanding} outstanding, {requested} requested from credit {credit_id}")]
    ExceedsInvoiceBalance {
        credit_id: CreditId,
        invoice_id: DocumentId,
        outstanding: Money,
        requested: Money,
    },

    #[error("application {application_id} is already reversed")]
    AlreadyReversed { application_id: ApplicationId },

    #[error("application {application_id} does not belong to credit {credit_id}")]
    ApplicationNotFound {
        credit_id: CreditId,
        application_id: ApplicationId,
    },

    #[error("credit {credit_id} still has {applied_total} applied to invoices")]
    HasApplications {
        credit_id: CreditId,
        applied_total: Money,
    },

    #[error("credit total {total} must be greater than zero")]
    InvalidTotal { total: Money },

    #[error("credit already opened")]
    AlreadyOpened,

    #[error("credit not found")]
    NotFound,

    #[error(transparent)]
    Domain(#[from] DomainError),
}
