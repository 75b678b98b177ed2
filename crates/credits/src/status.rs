use serde::{Deserialize, Serialize};

use ecf_core::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Available,
    Partial,
    Consumed,
    Void,
}

impl core::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CreditStatus::Available => "available",
            CreditStatus::Partial => "partial",
            CreditStatus::Consumed => "consumed",
            CreditStatus::Void => "void",
        };
        f.write_str(s)
    }
}

/// Status as a function of the balance. `void` overrides everything.
pub fn credit_status(available: Money, total: Money, voided: bool) -> CreditStatus {
    if voided {
        CreditStatus::Void
    } else if available.minor() <= 0 {
        CreditStatus::Consumed
    } else if available >= total {
        CreditStatus::Available
    } else {
        CreditStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundaries() {
        let total = Money::from_minor(1_000);
        assert_eq!(credit_status(total, total, false), CreditStatus::Available);
        assert_eq!(credit_status(Money::from_minor(1), total, false), CreditStatus::Partial);
        assert_eq!(credit_status(Money::ZERO, total, false), CreditStatus::Consumed);
        assert_eq!(credit_status(total, total, true), CreditStatus::Void);
    }

    proptest! {
        #[test]
        fn status_depends_only_on_balance(
            (total, available) in (1i64..1_000_000).prop_flat_map(|t| (Just(t), 0..=t))
        ) {
            let status =
                credit_status(Money::from_minor(available), Money::from_minor(total), false);
            let expected = if available == total {
                CreditStatus::Available
            } else if available == 0 {
                CreditStatus::Consumed
            } else {
                CreditStatus::Partial
            };
            prop_assert_eq!(status, expected);
        }
    }
}
