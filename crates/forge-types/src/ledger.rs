//! Credit ledger result types.

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Result of the advisory pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCheck {
    pub allowed: bool,
    pub balance: i64,
    pub reason: Option<String>,
}

impl CreditCheck {
    pub fn from_balance(balance: i64) -> Self {
        if balance > 0 {
            Self {
                allowed: true,
                balance,
                reason: None,
            }
        } else {
            Self {
                allowed: false,
                balance,
                reason: Some("Payment Required: Insufficient credits.".to_string()),
            }
        }
    }
}

/// Outcome of applying a verified payment event to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Credited { user_id: UserId, balance: i64 },
    /// The event id was already processed; nothing changed.
    Duplicate,
    /// No user exists for the payment's reference id.
    UnknownUser,
    /// The event does not describe a paid checkout; acknowledged only.
    Ignored { event_type: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_check_from_balance() {
        assert!(CreditCheck::from_balance(1).allowed);
        let denied = CreditCheck::from_balance(0);
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("Insufficient"));
    }
}
