//! Customer meter model
//!
//! The persisted aggregate of one meter for one customer. Rows are created
//! lazily by the reconciler and never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of recomputing a meter window from its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MeterBalance {
    pub consumed_units: Decimal,
    pub credited_units: Decimal,
    pub balance: Decimal,
}

impl MeterBalance {
    pub fn new(consumed_units: Decimal, credited_units: Decimal) -> Self {
        Self {
            consumed_units,
            credited_units,
            balance: credited_units - consumed_units,
        }
    }
}

/// Customer meter entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerMeter {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub meter_id: Uuid,
    pub consumed_units: Decimal,
    pub credited_units: Decimal,
    pub balance: Decimal,

    /// Tip event of the window the figures were computed from
    pub last_balanced_event_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl CustomerMeter {
    /// Create an empty, never-balanced row
    pub fn new(customer_id: Uuid, meter_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            meter_id,
            consumed_units: Decimal::ZERO,
            credited_units: Decimal::ZERO,
            balance: Decimal::ZERO,
            last_balanced_event_id: None,
            created_at: Utc::now(),
            modified_at: None,
        }
    }

    /// Whether the row already reflects the window ending at `event_id`
    #[inline]
    pub fn is_balanced_at(&self, event_id: Uuid) -> bool {
        self.last_balanced_event_id == Some(event_id)
    }

    /// Overwrite the figures and move the checkpoint to `event_id`
    pub fn apply(&mut self, balance: MeterBalance, event_id: Uuid) {
        self.consumed_units = balance.consumed_units;
        self.credited_units = balance.credited_units;
        self.balance = balance.balance;
        self.last_balanced_event_id = Some(event_id);
        self.modified_at = Some(Utc::now());
    }

    pub fn holds_invariant(&self) -> bool {
        self.balance == self.credited_units - self.consumed_units
    }
}
