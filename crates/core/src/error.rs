//! Domain error model shared by the fiscal modules.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Value-level failure raised while building domain primitives.
///
/// Module-specific rule violations (range lifecycle, credit balance, document
/// state) live in each module's own error enum; this type only covers the
/// shared building blocks (identifiers, codes, amounts, fiscal numbers).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A monetary amount could not be parsed or overflowed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A fixed-format code (document type, location code, e-NCF) is malformed.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidCode {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A referenced record does not exist.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A cross-record invariant would be broken (e.g. tenant mismatch).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_code(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidCode {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
