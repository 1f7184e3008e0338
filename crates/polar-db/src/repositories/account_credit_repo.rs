//! Account credit repository implementation
//!
//! Every ledger mutation runs in a single transaction that first locks the
//! account row, then updates the credit rows and the cached
//! `accounts.credit_balance` together. The balance never drops below zero.

use chrono::{DateTime, Utc};
use polar_core::{
    models::AccountCredit,
    traits::{AccountCreditRepository, CreditUsage, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const CREDIT_COLUMNS: &str = "id, account_id, campaign_id, title, amount, used, granted_at, expires_at, revoked_at, notes, metadata";

/// PostgreSQL implementation of AccountCreditRepository
pub struct PgAccountCreditRepository {
    pool: PgPool,
}

impl PgAccountCreditRepository {
    /// Create a new account credit repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            AppError::Transaction(format!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    /// Lock the account row for the rest of the transaction
    async fn lock_account(tx: &mut Transaction<'static, Postgres>, account_id: Uuid) -> AppResult<i64> {
        let balance: Option<(i64,)> =
            sqlx::query_as("SELECT credit_balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    error!("Failed to lock account {}: {}", account_id, e);
                    AppError::Database(format!("Failed to lock account: {}", e))
                })?;

        balance
            .map(|(balance,)| balance)
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }

    async fn set_balance(
        tx: &mut Transaction<'static, Postgres>,
        account_id: Uuid,
        balance: i64,
    ) -> AppResult<i64> {
        let (balance,): (i64,) = sqlx::query_as(
            r#"
            UPDATE accounts
            SET credit_balance = GREATEST(0, $2),
                modified_at = NOW()
            WHERE id = $1
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(balance)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to update balance for account {}: {}", account_id, e);
            AppError::Database(format!("Failed to update credit balance: {}", e))
        })?;

        Ok(balance)
    }
}

/// Balance after crediting `amount`
fn credited_balance(balance: i64, amount: i64) -> AppResult<i64> {
    balance.checked_add(amount).ok_or_else(|| {
        AppError::Validation(format!("Credit balance {} cannot absorb {}", balance, amount))
    })
}

/// Balance after debiting `amount`, before the zero floor
fn debited_balance(balance: i64, amount: i64) -> AppResult<i64> {
    balance.checked_sub(amount).ok_or_else(|| {
        AppError::Validation(format!("Credit balance {} cannot release {}", balance, amount))
    })
}

#[async_trait]
impl Repository<AccountCredit, Uuid> for PgAccountCreditRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<AccountCredit>> {
        let row = sqlx::query_as::<sqlx::Postgres, AccountCreditRow>(&format!(
            "SELECT {} FROM account_credits WHERE id = $1",
            CREDIT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding credit {}: {}", id, e);
            AppError::Database(format!("Failed to find credit: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl AccountCreditRepository for PgAccountCreditRepository {
    #[instrument(skip(self))]
    async fn list_by_account(&self, account_id: Uuid) -> AppResult<Vec<AccountCredit>> {
        let rows = sqlx::query_as::<sqlx::Postgres, AccountCreditRow>(&format!(
            "SELECT {} FROM account_credits WHERE account_id = $1 ORDER BY granted_at ASC, id ASC",
            CREDIT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing credits for {}: {}", account_id, e);
            AppError::Database(format!("Failed to list credits: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn list_active(&self, account_id: Uuid, now: DateTime<Utc>) -> AppResult<Vec<AccountCredit>> {
        let rows = sqlx::query_as::<sqlx::Postgres, AccountCreditRow>(&format!(
            r#"
            SELECT {}
            FROM account_credits
            WHERE account_id = $1
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > $2)
              AND used < amount
            ORDER BY granted_at ASC, id ASC
            "#,
            CREDIT_COLUMNS
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing active credits for {}: {}", account_id, e);
            AppError::Database(format!("Failed to list active credits: {}", e))
        })?;

        debug!("Found {} active credits", rows.len());
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, credit), fields(credit_id = %credit.id, account_id = %credit.account_id))]
    async fn insert_grant(&self, credit: &AccountCredit) -> AppResult<i64> {
        let mut tx = self.begin().await?;
        let balance = Self::lock_account(&mut tx, credit.account_id).await?;

        sqlx::query(
            r#"
            INSERT INTO account_credits (
                id, account_id, campaign_id, title, amount, used,
                granted_at, expires_at, revoked_at, notes, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(credit.id)
        .bind(credit.account_id)
        .bind(credit.campaign_id)
        .bind(&credit.title)
        .bind(credit.amount)
        .bind(credit.used)
        .bind(credit.granted_at)
        .bind(credit.expires_at)
        .bind(credit.revoked_at)
        .bind(&credit.notes)
        .bind(&credit.metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert credit {}: {}", credit.id, e);
            AppError::Database(format!("Failed to insert credit: {}", e))
        })?;

        // Returning before commit rolls back the insert
        let target = credited_balance(balance, credit.amount)?;
        let balance = Self::set_balance(&mut tx, credit.account_id, target).await?;
        Self::commit(tx).await?;

        info!("Granted credit {} ({}), balance now {}", credit.id, credit.amount, balance);
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn revoke(
        &self,
        credit_id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> AppResult<Option<(AccountCredit, i64)>> {
        let mut tx = self.begin().await?;

        let account_id: Option<(Uuid,)> =
            sqlx::query_as("SELECT account_id FROM account_credits WHERE id = $1")
                .bind(credit_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to find credit {}: {}", credit_id, e);
                    AppError::Database(format!("Failed to find credit: {}", e))
                })?;
        let (account_id,) =
            account_id.ok_or_else(|| AppError::CreditNotFound(credit_id.to_string()))?;

        // Account first, then credit: the same order as insert_grant and record_usage
        let balance = Self::lock_account(&mut tx, account_id).await?;

        let row = sqlx::query_as::<sqlx::Postgres, AccountCreditRow>(&format!(
            r#"
            UPDATE account_credits
            SET revoked_at = $2
            WHERE id = $1
              AND revoked_at IS NULL
            RETURNING {}
            "#,
            CREDIT_COLUMNS
        ))
        .bind(credit_id)
        .bind(revoked_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to revoke credit {}: {}", credit_id, e);
            AppError::Database(format!("Failed to revoke credit: {}", e))
        })?;

        let Some(row) = row else {
            warn!("Credit {} already revoked", credit_id);
            return Ok(None);
        };
        let credit: AccountCredit = row.into();

        let target = debited_balance(balance, credit.amount)?;
        let balance = Self::set_balance(&mut tx, account_id, target).await?;
        Self::commit(tx).await?;

        info!("Revoked credit {} ({}), balance now {}", credit.id, credit.amount, balance);
        Ok(Some((credit, balance)))
    }

    #[instrument(skip(self, usages), fields(usages = usages.len()))]
    async fn record_usage(
        &self,
        account_id: Uuid,
        usages: &[CreditUsage],
        reset_balance: bool,
    ) -> AppResult<i64> {
        let mut tx = self.begin().await?;
        let balance = Self::lock_account(&mut tx, account_id).await?;

        let mut total = 0i64;
        for usage in usages {
            let result = sqlx::query(
                r#"
                UPDATE account_credits
                SET used = used + $2
                WHERE id = $1
                  AND account_id = $3
                  AND revoked_at IS NULL
                  AND used + $2 <= amount
                "#,
            )
            .bind(usage.credit_id)
            .bind(usage.amount)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to record usage on credit {}: {}", usage.credit_id, e);
                AppError::Database(format!("Failed to record credit usage: {}", e))
            })?;

            // Dropping the transaction rolls back earlier usages
            if result.rows_affected() == 0 {
                warn!("Credit {} cannot absorb {}", usage.credit_id, usage.amount);
                return Err(AppError::Conflict(format!(
                    "Credit {} cannot absorb {}",
                    usage.credit_id, usage.amount
                )));
            }
            total = credited_balance(total, usage.amount)?;
        }

        let target = if reset_balance {
            0
        } else {
            debited_balance(balance, total)?
        };
        let balance = Self::set_balance(&mut tx, account_id, target).await?;
        Self::commit(tx).await?;

        debug!("Applied {} from {} credits, balance now {}", total, usages.len(), balance);
        Ok(balance)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct AccountCreditRow {
    id: Uuid,
    account_id: Uuid,
    campaign_id: Option<Uuid>,
    title: String,
    amount: i64,
    used: i64,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    metadata: Value,
}

impl From<AccountCreditRow> for AccountCredit {
    fn from(row: AccountCreditRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            campaign_id: row.campaign_id,
            title: row.title,
            amount: row.amount,
            used: row.used,
            granted_at: row.granted_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            notes: row.notes,
            metadata: row.metadata,
        }
    }
}
