//! Lock key and channel builders
//!
//! Provides standardized naming for every key the engine serializes on and
//! every channel it publishes to, preventing collisions between lock
//! families.
//!
//! # Key Patterns
//!
//! - `customer_meter:{customer_id}:{meter_id}` - Reconciliation of one meter for one customer
//! - `account_credit:{account_id}` - Ledger mutations for one account
//!
//! Redis-backed locks store these under the `lock:` namespace.
//!
//! # Example
//!
//! ```
//! use polar_cache::keys;
//! use uuid::Uuid;
//!
//! let account_id = Uuid::nil();
//! assert_eq!(
//!     keys::account_credit_lock_key(account_id),
//!     "account_credit:00000000-0000-0000-0000-000000000000"
//! );
//! ```

use uuid::Uuid;

/// Prefix for customer meter reconciliation locks
pub const CUSTOMER_METER_PREFIX: &str = "customer_meter";

/// Prefix for account credit ledger locks
pub const ACCOUNT_CREDIT_PREFIX: &str = "account_credit";

/// Namespace for lock keys stored in Redis
pub const LOCK_NAMESPACE: &str = "lock";

/// Channel suffix for customer state changes
pub const CUSTOMER_STATE_CHANGED: &str = "customer.state_changed";

/// Channel suffix for credit grants
pub const CREDIT_GRANTED: &str = "account_credit.granted";

/// Build the lock key serializing reconciliation of one customer meter
///
/// The meter is part of the key so different meters of the same customer
/// reconcile independently.
pub fn customer_meter_lock_key(customer_id: Uuid, meter_id: Uuid) -> String {
    format!("{}:{}:{}", CUSTOMER_METER_PREFIX, customer_id, meter_id)
}

/// Build the lock key serializing ledger mutations of one account
pub fn account_credit_lock_key(account_id: Uuid) -> String {
    format!("{}:{}", ACCOUNT_CREDIT_PREFIX, account_id)
}

/// Redis key under which a lock is stored
pub fn redis_lock_key(key: &str) -> String {
    format!("{}:{}", LOCK_NAMESPACE, key)
}

/// Build a notification channel name
pub fn channel(prefix: &str, suffix: &str) -> String {
    format!("{}:{}", prefix, suffix)
}
