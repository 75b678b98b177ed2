//! Tenant-isolated read models.
//!
//! The range registry, credit index and document index hold the latest state
//! of every aggregate for fast selection and lookups. They are disposable:
//! [`rebuild`] restores them from the event store at startup.

pub mod audit;
pub mod rebuild;
pub mod tenant_store;

pub use audit::{AuditEntry, AuditTrail};
pub use rebuild::rebuild;
pub use tenant_store::{InMemoryTenantStore, TenantStore};
