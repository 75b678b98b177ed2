use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ecf_core::{DocumentId, DomainError, Entity, Money, UserId};

use crate::credit::CreditId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(Uuid);

impl ApplicationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ApplicationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("ApplicationId: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Applied,
    Reversed,
}

/// One deduction of a credit against an invoice.
///
/// Immutable once recorded, except for the terminal flip to `reversed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditApplication {
    pub id: ApplicationId,
    pub credit_id: CreditId,
    pub invoice_id: DocumentId,
    pub amount: Money,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub applied_by: UserId,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<UserId>,
}

impl CreditApplication {
    pub fn is_applied(&self) -> bool {
        self.status == ApplicationStatus::Applied
    }
}

impl Entity for CreditApplication {
    type Id = ApplicationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
