//! Common traits for repositories and collaborators
//!
//! Defines the storage, locking and notification seams the metering services
//! are written against.

use crate::error::AppError;
use crate::models::{
    Account, AccountCredit, Customer, CustomerMeter, Event, Meter, Organization,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

/// Generic lookup trait shared by the entity repositories
#[async_trait]
pub trait Repository<T, ID>: Send + Sync {
    /// Find entity by ID
    async fn find_by_id(&self, id: ID) -> Result<Option<T>, AppError>;
}

/// Capabilities of a meter definition
///
/// How filters and aggregations are expressed is up to the implementor; the
/// reconciler only asks which events count and what they add up to.
pub trait MeterDefinition: Send + Sync {
    /// Whether a user event counts towards the meter
    fn matches(&self, event: &Event) -> bool;

    /// Combine matching events into a consumed quantity
    fn aggregate(&self, events: &[&Event]) -> Decimal;
}

/// One way of recognising a customer's events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerMatch<'a> {
    /// `events.customer_id = id`
    Id(Uuid),
    /// `events.organization_id = organization_id AND events.external_customer_id = external_id`
    External {
        organization_id: Uuid,
        external_id: &'a str,
    },
}

impl CustomerMatch<'_> {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            CustomerMatch::Id(id) => event.customer_id == Some(*id),
            CustomerMatch::External {
                organization_id,
                external_id,
            } => {
                event.organization_id == *organization_id
                    && event.external_customer_id.as_deref() == Some(*external_id)
            }
        }
    }
}

/// Scope of a window lookup for one customer and meter
#[derive(Debug, Clone, Copy)]
pub struct WindowQuery<'a> {
    pub customer: &'a Customer,
    pub meter: &'a Meter,

    /// Inclusive lower bound on `ingested_at`: the latest reset, if any
    pub since: Option<DateTime<Utc>>,
}

impl<'a> WindowQuery<'a> {
    pub fn new(customer: &'a Customer, meter: &'a Meter, since: Option<DateTime<Utc>>) -> Self {
        Self {
            customer,
            meter,
            since,
        }
    }

    /// The independent ways the customer's events can be found.
    ///
    /// Without an external id there is a single branch.
    pub fn customer_branches(&self) -> Vec<CustomerMatch<'a>> {
        let mut branches = vec![CustomerMatch::Id(self.customer.id)];
        if let Some(external_id) = self.customer.external_id.as_deref() {
            branches.push(CustomerMatch::External {
                organization_id: self.customer.organization_id,
                external_id,
            });
        }
        branches
    }

    pub fn belongs_to_customer(&self, event: &Event) -> bool {
        self.customer_branches().iter().any(|b| b.matches(event))
    }

    pub fn within_window(&self, event: &Event) -> bool {
        self.since.map_or(true, |since| event.ingested_at >= since)
    }

    /// Counts towards the window: a matching user event or a system event for this meter
    pub fn qualifies(&self, event: &Event) -> bool {
        self.meter.matches(event) || event.affects_meter(self.meter.id)
    }
}

/// Read access to the append-only event log
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Most recent `meter.reset` event for the customer and meter
    async fn latest_meter_reset(
        &self,
        customer: &Customer,
        meter: &Meter,
    ) -> Result<Option<Event>, AppError>;

    /// Most recent qualifying event within the window.
    ///
    /// Implementations may evaluate each customer branch separately and keep
    /// the newest row; that is only valid because a single row is returned.
    async fn latest_window_event(&self, query: &WindowQuery<'_>)
        -> Result<Option<Event>, AppError>;

    /// Matching user events and meter credit events in `[query.since, until]`,
    /// ordered by `ingested_at` ascending
    async fn window_events(
        &self,
        query: &WindowQuery<'_>,
        until: &Event,
    ) -> Result<Vec<Event>, AppError>;
}

/// Meter repository trait
#[async_trait]
pub trait MeterRepository: Repository<Meter, Uuid> {
    /// Non-archived meters of an organization in creation order
    async fn list_active_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<Meter>, AppError>;
}

/// Customer repository trait
#[async_trait]
pub trait CustomerRepository: Repository<Customer, Uuid> {
    /// Stamp `meters_updated_at`
    async fn touch_meters_updated_at(
        &self,
        customer_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Customer meter repository trait
#[async_trait]
pub trait CustomerMeterRepository: Send + Sync {
    async fn find(
        &self,
        customer_id: Uuid,
        meter_id: Uuid,
    ) -> Result<Option<CustomerMeter>, AppError>;

    /// Fetch the row, inserting an empty one if absent
    async fn get_or_create(
        &self,
        customer_id: Uuid,
        meter_id: Uuid,
    ) -> Result<CustomerMeter, AppError>;

    /// Persist figures and checkpoint
    async fn save(&self, customer_meter: &CustomerMeter) -> Result<CustomerMeter, AppError>;

    async fn list_by_customer(&self, customer_id: Uuid) -> Result<Vec<CustomerMeter>, AppError>;
}

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Repository<Account, Uuid> {
    /// Current cached credit balance
    async fn credit_balance(&self, account_id: Uuid) -> Result<i64, AppError>;
}

/// Amount taken from one credit by a fee application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditUsage {
    pub credit_id: Uuid,
    pub amount: i64,
}

/// Account credit repository trait
///
/// Every mutating method updates the credit rows and the account's cached
/// balance in one transaction and returns the new cached balance.
#[async_trait]
pub trait AccountCreditRepository: Repository<AccountCredit, Uuid> {
    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<AccountCredit>, AppError>;

    /// Active credits, oldest grant first
    async fn list_active(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountCredit>, AppError>;

    /// Insert the credit and add its amount to the account balance
    async fn insert_grant(&self, credit: &AccountCredit) -> Result<i64, AppError>;

    /// Mark the credit revoked and subtract its full amount (floored at zero).
    ///
    /// Returns `None` when the credit was already revoked; nothing changes then.
    async fn revoke(
        &self,
        credit_id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<Option<(AccountCredit, i64)>, AppError>;

    /// Add each usage to its credit's `used`, then reduce the balance by the
    /// total (floored at zero), resetting it to zero first when asked
    async fn record_usage(
        &self,
        account_id: Uuid,
        usages: &[CreditUsage],
        reset_balance: bool,
    ) -> Result<i64, AppError>;
}

/// Proof of a held lock, handed back on release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub token: String,
}

/// Named, timed advisory locks
#[async_trait]
pub trait Locker: Send + Sync {
    /// Acquire `key`, held for at most `hold`, waiting at most `wait`.
    ///
    /// Fails with `AppError::LockTimeout` once `wait` elapses.
    async fn acquire(&self, key: &str, hold: Duration, wait: Duration)
        -> Result<LockToken, AppError>;

    /// Release a lock; releasing an expired lock is not an error
    async fn release(&self, token: LockToken) -> Result<(), AppError>;
}

/// Fire-and-forget signals for webhook delivery and notifications
#[async_trait]
pub trait StateNotifier: Send + Sync {
    /// The customer's usage or balances changed
    async fn customer_state_changed(&self, customer: &Customer);

    /// Credits were granted to an account of the organization
    async fn credit_granted(&self, organization: &Organization, credit: &AccountCredit);
}
