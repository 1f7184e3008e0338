//! Account model
//!
//! Represents the billing account that holds prepaid credit. The cached
//! `credit_balance` is a projection of the account's credit ledger and is
//! only ever mutated by the ledger service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization, when the account belongs to one
    pub organization_id: Option<Uuid>,

    /// Cached sum of granted credit, in minor currency units
    pub credit_balance: i64,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub modified_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Check if the cached balance claims any credit
    #[inline]
    pub fn has_credit(&self) -> bool {
        self.credit_balance > 0
    }

    /// Balance after removing `amount`, never below zero
    #[inline]
    pub fn reduced_balance(&self, amount: i64) -> i64 {
        (self.credit_balance - amount).max(0)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: None,
            credit_balance: 0,
            currency: "usd".to_string(),
            created_at: Utc::now(),
            modified_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_credit() {
        let mut account = Account::default();
        assert!(!account.has_credit());

        account.credit_balance = 100;
        assert!(account.has_credit());
    }

    #[test]
    fn test_reduced_balance_floors_at_zero() {
        let account = Account {
            credit_balance: 50,
            ..Default::default()
        };

        assert_eq!(account.reduced_balance(20), 30);
        assert_eq!(account.reduced_balance(80), 0);
    }
}
