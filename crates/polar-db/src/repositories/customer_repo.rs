//! Customer repository implementation

use chrono::{DateTime, Utc};
use polar_core::{
    models::Customer,
    traits::{CustomerRepository, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// PostgreSQL implementation of CustomerRepository
pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    /// Create a new customer repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository<Customer, Uuid> for PgCustomerRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Customer>> {
        debug!("Finding customer by id: {}", id);

        let row = sqlx::query_as::<sqlx::Postgres, CustomerRow>(
            r#"
            SELECT id, organization_id, external_id, meters_updated_at, created_at
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding customer {}: {}", id, e);
            AppError::Database(format!("Failed to find customer: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    #[instrument(skip(self))]
    async fn touch_meters_updated_at(&self, customer_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let result = sqlx::query("UPDATE customers SET meters_updated_at = $2 WHERE id = $1")
            .bind(customer_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error stamping customer {}: {}", customer_id, e);
                AppError::Database(format!("Failed to update customer: {}", e))
            })?;

        if result.rows_affected() == 0 {
            warn!("Customer {} vanished before meters_updated_at was stamped", customer_id);
            return Err(AppError::CustomerNotFound(customer_id.to_string()));
        }
        Ok(())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    organization_id: Uuid,
    external_id: Option<String>,
    meters_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            external_id: row.external_id,
            meters_updated_at: row.meters_updated_at,
            created_at: row.created_at,
        }
    }
}
