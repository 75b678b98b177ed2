use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use ecf_core::DomainError;
use ecf_credits::CreditError;
use ecf_documents::DocumentError;
use ecf_infra::allocator::AllocationError;
use ecf_infra::ledger::LedgerError;
use ecf_infra::workflow::WorkflowError;
use ecf_sequencing::RangeError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn infrastructure(msg: String) -> Response {
    error!(error = %msg, "infrastructure failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error", msg)
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
        DomainError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
        DomainError::InvalidCode { .. } => (StatusCode::BAD_REQUEST, "invalid_code"),
        DomainError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        DomainError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        DomainError::InvariantViolation(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation")
        }
    };
    json_error(status, code, message)
}

fn range_error(err: RangeError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        RangeError::NotActive { .. } => (StatusCode::CONFLICT, "range_not_active"),
        RangeError::Exhausted { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "range_exhausted"),
        RangeError::AlreadyExpired { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "range_already_expired")
        }
        RangeError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        RangeError::Overlap { .. } => (StatusCode::CONFLICT, "overlapping_range"),
        RangeError::InvalidBounds { .. } => (StatusCode::BAD_REQUEST, "invalid_bounds"),
        RangeError::MissingExpiration(_) => (StatusCode::BAD_REQUEST, "missing_expiration"),
        RangeError::AlreadyExists => (StatusCode::CONFLICT, "already_exists"),
        RangeError::NotFound => (StatusCode::NOT_FOUND, "range_not_found"),
        RangeError::Domain(e) => return domain_error_to_response(e),
    };
    json_error(status, code, message)
}

pub fn allocation_error_to_response(err: AllocationError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        AllocationError::ResourceBusy(_) => (StatusCode::CONFLICT, "resource_busy"),
        AllocationError::Range(e) => return range_error(e),
        AllocationError::RangeNotFound(_) => (StatusCode::NOT_FOUND, "range_not_found"),
        AllocationError::NoActiveRange { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "no_active_range")
        }
        AllocationError::Infrastructure(msg) => return infrastructure(msg),
    };
    json_error(status, code, message)
}

fn credit_error(err: CreditError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        CreditError::Voided { .. } => (StatusCode::CONFLICT, "credit_void"),
        CreditError::Consumed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "credit_consumed"),
        CreditError::InvalidAmount { .. } => (StatusCode::BAD_REQUEST, "invalid_amount"),
        CreditError::InsufficientBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance")
        }
        CreditError::OwnerMismatch { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "owner_mismatch"),
        CreditError::ExceedsInvoiceBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "exceeds_invoice_balance")
        }
        CreditError::AlreadyReversed { .. } => (StatusCode::CONFLICT, "already_reversed"),
        CreditError::ApplicationNotFound { .. } => (StatusCode::NOT_FOUND, "application_not_found"),
        CreditError::HasApplications { .. } => (StatusCode::CONFLICT, "has_applications"),
        CreditError::InvalidTotal { .. } => (StatusCode::BAD_REQUEST, "invalid_total"),
        CreditError::AlreadyOpened => (StatusCode::CONFLICT, "already_exists"),
        CreditError::NotFound => (StatusCode::NOT_FOUND, "credit_not_found"),
        CreditError::Domain(e) => return domain_error_to_response(e),
    };
    json_error(status, code, message)
}

pub fn ledger_error_to_response(err: LedgerError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        LedgerError::ResourceBusy(_) => (StatusCode::CONFLICT, "resource_busy"),
        LedgerError::Credit(e) => return credit_error(e),
        LedgerError::CreditNotFound(_) => (StatusCode::NOT_FOUND, "credit_not_found"),
        LedgerError::ApplicationNotFound(_) => (StatusCode::NOT_FOUND, "application_not_found"),
        LedgerError::Infrastructure(msg) => return infrastructure(msg),
    };
    json_error(status, code, message)
}

fn document_error(err: DocumentError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        DocumentError::AlreadyExists => (StatusCode::CONFLICT, "already_exists"),
        DocumentError::NotFound => (StatusCode::NOT_FOUND, "document_not_found"),
        DocumentError::AlreadyNumbered { .. } => (StatusCode::CONFLICT, "already_numbered"),
        DocumentError::NotNumbered { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "not_numbered"),
        DocumentError::NotSubmitted { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "not_submitted"),
        DocumentError::Cancelled { .. } => (StatusCode::CONFLICT, "document_cancelled"),
        DocumentError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        DocumentError::TypeMismatch { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "type_mismatch"),
        DocumentError::MissingBuyerRnc(_) => (StatusCode::BAD_REQUEST, "missing_buyer_rnc"),
        DocumentError::InvalidBuyerRnc(_) => (StatusCode::BAD_REQUEST, "invalid_buyer_rnc"),
        DocumentError::MissingReference(_) => (StatusCode::BAD_REQUEST, "missing_reference"),
        DocumentError::ExceedsReferencedTotal { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "exceeds_referenced_total")
        }
        DocumentError::InvalidTotal(_) => (StatusCode::BAD_REQUEST, "invalid_total"),
        DocumentError::Domain(e) => return domain_error_to_response(e),
    };
    json_error(status, code, message)
}

pub fn workflow_error_to_response(err: WorkflowError) -> Response {
    let message = err.to_string();
    let (status, code) = match err {
        WorkflowError::ResourceBusy(_) => (StatusCode::CONFLICT, "resource_busy"),
        WorkflowError::Document(e) => return document_error(e),
        WorkflowError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, "document_not_found"),
        WorkflowError::DuplicateEncf(_) => (StatusCode::CONFLICT, "duplicate_encf"),
        WorkflowError::NotAcceptedCreditNote(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "not_accepted_credit_note")
        }
        WorkflowError::NotAnInvoice(_) => (StatusCode::UNPROCESSABLE_ENTITY, "not_an_invoice"),
        WorkflowError::Allocation(e) => return allocation_error_to_response(e),
        WorkflowError::Ledger(e) => return ledger_error_to_response(e),
        WorkflowError::Signing(_) => (StatusCode::BAD_GATEWAY, "signing_service_error"),
        WorkflowError::Infrastructure(msg) => return infrastructure(msg),
    };
    json_error(status, code, message)
}
