use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use ecf_core::{DomainError, ValueObject};

use crate::document_type::DocumentType;

/// Electronic fiscal number: `E` + two-digit type code + ten-digit sequence.
///
/// Always exactly 13 characters, e.g. `E310000000001`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Encf {
    document_type: DocumentType,
    sequence: u64,
}

impl ValueObject for Encf {}

impl Encf {
    pub const LEN: usize = 13;

    /// Largest sequence that fits in ten digits.
    pub const MAX_SEQUENCE: u64 = 9_999_999_999;

    /// Build the fiscal number for an issued sequence.
    pub fn compose(document_type: DocumentType, sequence: u64) -> Result<Self, DomainError> {
        let encf = Self {
            document_type,
            sequence,
        };
        let rendered = encf.to_string();
        if sequence == 0 || rendered.len() != Self::LEN {
            return Err(DomainError::invalid_code(
                "e-NCF",
                rendered,
                "must be exactly 13 characters with a positive sequence",
            ));
        }
        Ok(encf)
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for Encf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}{:010}", self.document_type.code(), self.sequence)
    }
}

impl FromStr for Encf {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DomainError::invalid_code("e-NCF", s, reason);

        if s.len() != Self::LEN || !s.is_ascii() {
            return Err(invalid("must be exactly 13 characters"));
        }
        let rest = s.strip_prefix('E').ok_or_else(|| invalid("must start with 'E'"))?;
        let (code, digits) = rest.split_at(2);
        let document_type = code.parse::<DocumentType>()?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("sequence must be 10 digits"));
        }
        let sequence = digits
            .parse::<u64>()
            .map_err(|_| invalid("sequence must be 10 digits"))?;

        Self::compose(document_type, sequence)
    }
}

impl TryFrom<String> for Encf {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Encf> for String {
    fn from(value: Encf) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_thirteen_character_number() {
        let encf = Encf::compose(DocumentType::FiscalCredit, 1).unwrap();
        assert_eq!(encf.to_string(), "E310000000001");
        assert_eq!(encf.to_string().len(), Encf::LEN);
    }

    #[test]
    fn rejects_sequences_that_overflow_ten_digits() {
        assert!(Encf::compose(DocumentType::CreditNote, Encf::MAX_SEQUENCE).is_ok());
        assert!(Encf::compose(DocumentType::CreditNote, Encf::MAX_SEQUENCE + 1).is_err());
        assert!(Encf::compose(DocumentType::CreditNote, 0).is_err());
    }

    #[test]
    fn parses_back_type_and_sequence() {
        let encf: Encf = "E340000000042".parse().unwrap();
        assert_eq!(encf.document_type(), DocumentType::CreditNote);
        assert_eq!(encf.sequence(), 42);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("E34000000004".parse::<Encf>().is_err());
        assert!("B340000000042".parse::<Encf>().is_err());
        assert!("E990000000042".parse::<Encf>().is_err());
        assert!("E34000000004x".parse::<Encf>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let encf = Encf::compose(DocumentType::Consumer, 7).unwrap();
        assert_eq!(serde_json::to_string(&encf).unwrap(), "\"E320000000007\"");
    }
}
