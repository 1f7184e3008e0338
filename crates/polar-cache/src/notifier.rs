//! Redis pub/sub notifier
//!
//! Publishes customer state changes and credit grants for downstream
//! webhook delivery. Publishing is best-effort: failures are logged and
//! never surface to the caller.

use crate::{keys, RedisCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polar_core::{
    models::{AccountCredit, Customer, Organization},
    traits::StateNotifier,
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct CustomerStateChanged {
    customer_id: Uuid,
    organization_id: Uuid,
    external_id: Option<String>,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CreditGranted<'a> {
    organization_id: Uuid,
    organization_slug: &'a str,
    credit: &'a AccountCredit,
    occurred_at: DateTime<Utc>,
}

/// Notifier publishing JSON payloads to `{prefix}:{event}` channels
#[derive(Clone)]
pub struct RedisNotifier {
    cache: RedisCache,
    prefix: String,
}

impl RedisNotifier {
    pub fn new(cache: RedisCache, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    async fn publish<T: Serialize + Sync>(&self, suffix: &str, payload: &T) {
        let channel = keys::channel(&self.prefix, suffix);
        match self.cache.publish_json(&channel, payload).await {
            Ok(receivers) => debug!("Published to {} ({} receivers)", channel, receivers),
            Err(e) => warn!("Failed to publish to {}: {}", channel, e),
        }
    }
}

#[async_trait]
impl StateNotifier for RedisNotifier {
    async fn customer_state_changed(&self, customer: &Customer) {
        let payload = CustomerStateChanged {
            customer_id: customer.id,
            organization_id: customer.organization_id,
            external_id: customer.external_id.clone(),
            occurred_at: Utc::now(),
        };
        self.publish(keys::CUSTOMER_STATE_CHANGED, &payload).await;
    }

    async fn credit_granted(&self, organization: &Organization, credit: &AccountCredit) {
        let payload = CreditGranted {
            organization_id: organization.id,
            organization_slug: &organization.slug,
            credit,
            occurred_at: Utc::now(),
        };
        self.publish(keys::CREDIT_GRANTED, &payload).await;
    }
}
