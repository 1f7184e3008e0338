//! Polar Metering Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the usage metering and credit ledger engine. It includes:
//!
//! - Domain models (Meter, Event, CustomerMeter, Account, AccountCredit, etc.)
//! - Repository and collaborator traits consumed by the services
//! - Unified error handling with transient/permanent classification
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
