//! Non-blocking, record-scoped exclusive locks.
//!
//! Issuing a number or applying a credit takes the lock of that one record and
//! fails immediately when another request holds it. The store's expected-version
//! check backs this up across processes sharing a database.

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

use ecf_core::{AggregateId, TenantId};
use ecf_sequencing::{DocumentType, IssuingLocation};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// A single range or credit.
    Record {
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    },
    /// All ranges of one type at one location (serializes activation).
    Pool {
        tenant_id: TenantId,
        document_type: DocumentType,
        location: IssuingLocation,
    },
}

impl LockKey {
    pub fn record(tenant_id: TenantId, aggregate_id: impl Into<AggregateId>) -> Self {
        LockKey::Record {
            tenant_id,
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn pool(
        tenant_id: TenantId,
        document_type: DocumentType,
        location: IssuingLocation,
    ) -> Self {
        LockKey::Pool {
            tenant_id,
            document_type,
            location,
        }
    }
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Record { aggregate_id, .. } => write!(f, "record {aggregate_id}"),
            LockKey::Pool {
                document_type,
                location,
                ..
            } => write!(f, "range pool {document_type}@{location}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key} is locked by another operation")]
pub struct LockBusy {
    pub key: LockKey,
}

/// Set of currently held keys.
#[derive(Debug, Default)]
pub struct RecordLocks {
    held: Mutex<HashSet<LockKey>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` without waiting. Released when the guard drops.
    pub fn try_lock(&self, key: LockKey) -> Result<RecordGuard<'_>, LockBusy> {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(key.clone()) {
            return Err(LockBusy { key });
        }
        Ok(RecordGuard { locks: self, key })
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        match self.held.lock() {
            Ok(held) => held.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }
}

#[derive(Debug)]
pub struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    key: LockKey,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        let mut held = match self.locks.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
    }
}
