//! `ecf-credits`: balances from accepted credit notes and their applications.
//!
//! A [`Credit`] is opened when the regulator accepts a credit note. Its balance
//! is consumed by applying it to invoices of the same partner; every
//! application can be reversed, restoring the balance.

pub mod application;
pub mod credit;
pub mod error;
pub mod status;

pub use application::{ApplicationId, ApplicationStatus, CreditApplication};
pub use credit::{
    ApplicationReversed, ApplyCredit, Credit, CreditApplied, CreditCommand, CreditEvent, CreditId,
    CreditOpened, CreditVoided, InvoiceTarget, OpenCredit, ReverseApplication, VoidCredit,
};
pub use error::CreditError;
pub use status::{CreditStatus, credit_status};
