//! Polar Metering Database Layer
//!
//! This crate provides PostgreSQL access and repository implementations
//! for the metering engine. It includes:
//!
//! - Connection pool management with sqlx
//! - Bundled schema migrations
//! - The union-of-branches window lookup over the event log
//! - Ledger mutations that update credits and the cached balance atomically

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use polar_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
