//! Customer model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer entity
///
/// Events may reference a customer by its internal id or by the merchant's
/// own external id; both must be considered when locating a customer's events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub external_id: Option<String>,

    /// Last time any of the customer's meters changed
    pub meters_updated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Default for Customer {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            external_id: None,
            meters_updated_at: None,
            created_at: Utc::now(),
        }
    }
}
