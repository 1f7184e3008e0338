//! Domain models for Polar metering
//!
//! This module contains the core domain models read and written by the
//! reconciler and the credit ledger.

pub mod account;
pub mod account_credit;
pub mod campaign;
pub mod customer;
pub mod customer_meter;
pub mod event;
pub mod meter;
pub mod organization;

pub use account::Account;
pub use account_credit::{AccountCredit, CreditGrant};
pub use campaign::Campaign;
pub use customer::Customer;
pub use customer_meter::{CustomerMeter, MeterBalance};
pub use event::{system_events, Event, EventSource};
pub use meter::{FilterClause, FilterConjunction, FilterOperator, Meter, MeterAggregation, MeterFilter};
pub use organization::Organization;
