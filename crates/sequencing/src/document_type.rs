//! Catalog of electronic fiscal receipt types.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use ecf_core::DomainError;

/// Electronic receipt type, identified on the wire by its two-digit code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    /// 31: sale that grants the buyer fiscal credit.
    #[serde(rename = "31")]
    FiscalCredit,
    /// 32: sale to an end consumer.
    #[serde(rename = "32")]
    Consumer,
    #[serde(rename = "33")]
    DebitNote,
    #[serde(rename = "34")]
    CreditNote,
    /// 41: purchase from a local supplier.
    #[serde(rename = "41")]
    Purchase,
    #[serde(rename = "43")]
    MinorExpenses,
    #[serde(rename = "44")]
    SpecialRegime,
    #[serde(rename = "45")]
    Government,
    #[serde(rename = "46")]
    Export,
    /// 47: services billed to clients abroad.
    #[serde(rename = "47")]
    ForeignPayments,
}

impl DocumentType {
    pub const ALL: [DocumentType; 10] = [
        DocumentType::FiscalCredit,
        DocumentType::Consumer,
        DocumentType::DebitNote,
        DocumentType::CreditNote,
        DocumentType::Purchase,
        DocumentType::MinorExpenses,
        DocumentType::SpecialRegime,
        DocumentType::Government,
        DocumentType::Export,
        DocumentType::ForeignPayments,
    ];

    pub fn code(self) -> &'static str {
        match self {
            DocumentType::FiscalCredit => "31",
            DocumentType::Consumer => "32",
            DocumentType::DebitNote => "33",
            DocumentType::CreditNote => "34",
            DocumentType::Purchase => "41",
            DocumentType::MinorExpenses => "43",
            DocumentType::SpecialRegime => "44",
            DocumentType::Government => "45",
            DocumentType::Export => "46",
            DocumentType::ForeignPayments => "47",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DocumentType::FiscalCredit => "Factura de Crédito Fiscal Electrónica",
            DocumentType::Consumer => "Factura de Consumo Electrónica",
            DocumentType::DebitNote => "Nota de Débito Electrónica",
            DocumentType::CreditNote => "Nota de Crédito Electrónica",
            DocumentType::Purchase => "Comprobante Electrónico de Compras",
            DocumentType::MinorExpenses => "Comprobante Electrónico para Gastos Menores",
            DocumentType::SpecialRegime => "Comprobante Electrónico para Regímenes Especiales",
            DocumentType::Government => "Comprobante Electrónico Gubernamental",
            DocumentType::Export => "Comprobante Electrónico para Exportaciones",
            DocumentType::ForeignPayments => "Comprobante Electrónico para Pagos al Exterior",
        }
    }

    pub fn is_sale(self) -> bool {
        matches!(
            self,
            DocumentType::FiscalCredit
                | DocumentType::Consumer
                | DocumentType::SpecialRegime
                | DocumentType::Government
                | DocumentType::Export
                | DocumentType::ForeignPayments
        )
    }

    pub fn is_purchase(self) -> bool {
        matches!(self, DocumentType::Purchase | DocumentType::MinorExpenses)
    }

    pub fn is_credit_note(self) -> bool {
        self == DocumentType::CreditNote
    }

    pub fn is_debit_note(self) -> bool {
        self == DocumentType::DebitNote
    }

    /// Whether the counterpart must carry an RNC/cédula.
    pub fn requires_buyer_rnc(self) -> bool {
        !matches!(
            self,
            DocumentType::Consumer | DocumentType::MinorExpenses | DocumentType::SpecialRegime
        )
    }

    /// Credit-note ranges are authorized without an expiration date.
    pub fn ranges_expire(self) -> bool {
        !self.is_credit_note()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.code() == s)
            .ok_or_else(|| DomainError::invalid_code("document type", s, "unknown e-CF type code"))
    }
}
