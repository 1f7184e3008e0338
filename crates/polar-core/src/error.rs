//! Unified error handling for Polar metering
//!
//! This module provides a single error type covering every failure the
//! reconciler and the credit ledger can surface, with stable error codes
//! and a transient/permanent classification for callers deciding on retries.

use thiserror::Error;
use uuid::Uuid;

/// Main application error type
///
/// All errors in the engine should be converted to this type.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Locking Errors ====================
    #[error("Timed out acquiring lock: {key}")]
    LockTimeout { key: String },

    // ==================== Business Logic Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Credit not found: {0}")]
    CreditNotFound(String),

    #[error("Credit already revoked: {0}")]
    CreditAlreadyRevoked(Uuid),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the error code for logs and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::LockTimeout { .. } => "lock_timeout",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::CustomerNotFound(_) => "customer_not_found",
            AppError::CreditNotFound(_) => "credit_not_found",
            AppError::CreditAlreadyRevoked(_) => "credit_already_revoked",
            AppError::InsufficientCredits { .. } => "insufficient_credits",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a later retry of the same call may succeed.
    ///
    /// Lock contention and connectivity problems are transient; logical
    /// precondition violations such as a double revoke are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::LockTimeout { .. }
                | AppError::Pool(_)
                | AppError::CacheConnection(_)
                | AppError::Transaction(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => AppError::Pool(err.to_string()),
            sqlx::Error::RowNotFound => AppError::NotFound(err.to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() {
            AppError::CacheConnection(err.to_string())
        } else {
            AppError::Cache(err.to_string())
        }
    }
}
