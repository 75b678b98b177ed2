use core::fmt;

use serde::{Deserialize, Serialize};

use ecf_core::{DomainError, ValueObject};

/// Establishment + emission point, each exactly three ASCII digits.
///
/// Together with the document type this selects which range numbers a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawLocation")]
pub struct IssuingLocation {
    establishment: String,
    emission_point: String,
}

#[derive(Deserialize)]
struct RawLocation {
    establishment: String,
    emission_point: String,
}

impl TryFrom<RawLocation> for IssuingLocation {
    type Error = DomainError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        IssuingLocation::new(raw.establishment, raw.emission_point)
    }
}

impl ValueObject for IssuingLocation {}

impl IssuingLocation {
    pub fn new(
        establishment: impl Into<String>,
        emission_point: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let establishment = establishment.into();
        let emission_point = emission_point.into();
        check_three_digits("establishment", &establishment)?;
        check_three_digits("emission point", &emission_point)?;
        Ok(Self {
            establishment,
            emission_point,
        })
    }

    pub fn establishment(&self) -> &str {
        &self.establishment
    }

    pub fn emission_point(&self) -> &str {
        &self.emission_point
    }
}

fn check_three_digits(field: &'static str, value: &str) -> Result<(), DomainError> {
    if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::invalid_code(
            field,
            value,
            "must be exactly 3 digits",
        ));
    }
    Ok(())
}

impl fmt::Display for IssuingLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.establishment, self.emission_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_three_digit_codes() {
        let loc = IssuingLocation::new("001", "002").unwrap();
        assert_eq!(loc.to_string(), "001-002");
    }

    #[test]
    fn rejects_wrong_length_or_non_digits() {
        assert!(IssuingLocation::new("01", "001").is_err());
        assert!(IssuingLocation::new("001", "0001").is_err());
        assert!(IssuingLocation::new("0a1", "001").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let bad = serde_json::from_str::<IssuingLocation>(
            r#"{"establishment":"1","emission_point":"001"}"#,
        );
        assert!(bad.is_err());
    }
}
