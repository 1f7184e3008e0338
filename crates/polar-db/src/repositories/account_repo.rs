//! Account repository implementation
//!
//! Accounts are read here; their cached credit balance is written only by
//! the account credit repository, inside ledger transactions.

use chrono::{DateTime, Utc};
use polar_core::{
    models::Account,
    traits::{AccountRepository, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of AccountRepository
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository<Account, Uuid> for PgAccountRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        debug!("Finding account by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, AccountRow>(
            r#"
            SELECT id, organization_id, credit_balance, currency, created_at, modified_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding account {}: {}", id, e);
            AppError::Database(format!("Failed to find account: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    #[instrument(skip(self))]
    async fn credit_balance(&self, account_id: Uuid) -> AppResult<i64> {
        let balance: Option<(i64,)> =
            sqlx::query_as("SELECT credit_balance FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error reading balance for {}: {}", account_id, e);
                    AppError::Database(format!("Failed to read credit balance: {}", e))
                })?;

        balance
            .map(|(balance,)| balance)
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    credit_balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
    modified_at: Option<DateTime<Utc>>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            credit_balance: row.credit_balance,
            currency: row.currency,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}
