//! Repository implementations
//!
//! Concrete implementations of the repository traits defined in
//! polar-core, using sqlx for PostgreSQL access.

pub mod account_credit_repo;
pub mod account_repo;
pub mod customer_meter_repo;
pub mod customer_repo;
pub mod event_repo;
pub mod meter_repo;

pub use account_credit_repo::PgAccountCreditRepository;
pub use account_repo::PgAccountRepository;
pub use customer_meter_repo::PgCustomerMeterRepository;
pub use customer_repo::PgCustomerRepository;
pub use event_repo::PgEventRepository;
pub use meter_repo::PgMeterRepository;
