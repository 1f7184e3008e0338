//! Business logic services for Polar metering
//!
//! This crate turns the append-only event log into consistent balances:
//! usage meters per customer, and prepaid credit per account.
//!
//! # Architecture
//!
//! Services are written against the collaborator traits in `polar-core`:
//! - Each service holds its collaborators as `Arc<dyn Trait>`
//! - Aggregates are recomputed from events, never updated incrementally
//! - Every mutation is serialized per key through a `Locker`
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `WindowResolver` - Current billing window of a customer meter
//! - `CustomerMeterService` - Meter reconciliation and rollover
//! - `AccountCreditService` - Credit grants, revocation and fee application

pub mod account_credit;
pub mod customer_meter;
pub mod lock;
pub mod running_sum;
pub mod window;

pub use account_credit::{plan_fee_application, AccountCreditService, FeeApplication};
pub use customer_meter::{
    compute_meter_balance, compute_rollover_units, CustomerMeterService, ReconcileSummary,
};
pub use lock::with_lock;
pub use running_sum::{clamped_prefix_sums, clamped_running_sum};
pub use window::{MeterWindow, WindowResolver};

/// Business logic constants
pub mod constants {
    use polar_core::config::LockTimings;
    use std::time::Duration;

    /// Customer meter locks outlive any single reconciliation
    pub const CUSTOMER_METER_LOCK: LockTimings = LockTimings {
        hold: Duration::from_secs(5),
        wait: Duration::from_millis(200),
    };

    /// Ledger callers wait longer than reconcilers before giving up
    pub const ACCOUNT_CREDIT_LOCK: LockTimings = LockTimings {
        hold: Duration::from_secs(5),
        wait: Duration::from_secs(2),
    };
}
