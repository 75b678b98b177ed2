//! Value objects: equality by value, not identity.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; to
/// "modify" one, build a new one.
pub trait ValueObject: Clone + PartialEq + fmt::Debug {}

/// Monetary amount in the smallest currency unit (centavos).
///
/// Signed so that a requested non-positive amount can be represented and then
/// rejected by the ledger rather than by the parser. Serialized as a decimal
/// string (`"125.00"`).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    /// Number of minor units per major unit.
    pub const SCALE: i64 = 100;

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Sum of `amounts`, pinned at the `i64` bounds instead of wrapping.
    ///
    /// Totals used as caps stay on the refusing side: a pinned sum never
    /// reports less than what was actually added.
    pub fn saturating_sum<I>(amounts: I) -> Money
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .fold(Money::ZERO, |acc, amount| Money(acc.0.saturating_add(amount.0)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{sign}{}.{:02}", abs / scale, abs % scale)
    }
}

/// Parses a decimal amount such as `"400"`, `"400.5"` or `"-12.34"`.
/// At most two fractional digits are accepted.
impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_amount(format!("'{raw}' is not a decimal")));
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_amount(format!(
                "'{raw}' must have at most two decimal places"
            )));
        }

        let whole: i64 = whole
            .parse()
            .map_err(|_| DomainError::invalid_amount(format!("'{raw}' is out of range")))?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().unwrap_or(0) * 10,
            _ => frac.parse::<i64>().unwrap_or(0),
        };

        let minor = whole
            .checked_mul(Self::SCALE)
            .and_then(|m| m.checked_add(frac))
            .ok_or_else(|| DomainError::invalid_amount(format!("'{raw}' is out of range")))?;

        Ok(Money(if negative { -minor } else { minor }))
    }
}

impl TryFrom<String> for Money {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}
