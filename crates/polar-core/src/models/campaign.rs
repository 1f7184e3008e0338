//! Campaign model
//!
//! Campaigns attach a signup bonus to accounts created while they run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to credits granted from a campaign
pub const SIGNUP_BONUS_TITLE: &str = "Signup Bonus";

/// Campaign entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub id: Uuid,
    pub code: String,

    /// Credit granted on signup, in minor currency units
    pub credit_amount: Option<i64>,

    /// Credits granted from this campaign expire when it ends
    pub ends_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Credit amount worth granting, if any
    pub fn grantable_amount(&self) -> Option<i64> {
        self.credit_amount.filter(|amount| *amount > 0)
    }
}
