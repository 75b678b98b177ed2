//! `ecf-core`: domain building blocks for electronic fiscal receipts.
//!
//! Pure domain primitives only: identifiers, the shared error type, aggregate
//! traits and value objects. No IO, no clocks.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, DocumentId, PartnerId, TenantId, UserId};
pub use value_object::{Money, ValueObject};
