//! Account credit model
//!
//! A ledger entry of prepaid credit. Credits are consumed oldest-first,
//! may expire, and are terminally closed by revocation.
//!
//! Lifecycle:
//! 1. Granted with `used = 0`
//! 2. `used` grows as fees are applied, up to `amount`
//! 3. Optionally revoked; a revoked credit is never consumed again

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Account credit entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountCredit {
    pub id: Uuid,
    pub account_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub title: String,

    /// Granted amount, in minor currency units
    pub amount: i64,

    /// Consumed amount; always within `0..=amount`
    pub used: i64,

    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub metadata: Value,
}

impl AccountCredit {
    /// Build a fresh credit from a grant request
    pub fn from_grant(account_id: Uuid, grant: CreditGrant) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            campaign_id: grant.campaign_id,
            title: grant.title,
            amount: grant.amount,
            used: 0,
            granted_at: Utc::now(),
            expires_at: grant.expires_at,
            revoked_at: None,
            notes: grant.notes,
            metadata: grant.metadata.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    /// Unused portion of the credit
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.amount - self.used
    }

    #[inline]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Not revoked, not expired, and with something left to consume
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now) && self.remaining() > 0
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// Input for granting a credit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditGrant {
    pub amount: i64,
    pub title: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
    pub campaign_id: Option<Uuid>,
}

impl CreditGrant {
    pub fn new(amount: i64, title: impl Into<String>) -> Self {
        Self {
            amount,
            title: title.into(),
            expires_at: None,
            notes: None,
            metadata: None,
            campaign_id: None,
        }
    }

    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }
}
