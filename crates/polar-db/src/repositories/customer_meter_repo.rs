//! Customer meter repository implementation
//!
//! Rows are created lazily with `INSERT ... ON CONFLICT DO NOTHING` so two
//! reconcilers racing on a fresh pair converge on the same row.

use chrono::{DateTime, Utc};
use polar_core::{
    models::CustomerMeter, traits::CustomerMeterRepository, AppError, AppResult,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

const CUSTOMER_METER_COLUMNS: &str = "id, customer_id, meter_id, consumed_units, credited_units, balance, last_balanced_event_id, created_at, modified_at";

/// PostgreSQL implementation of CustomerMeterRepository
pub struct PgCustomerMeterRepository {
    pool: PgPool,
}

impl PgCustomerMeterRepository {
    /// Create a new customer meter repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerMeterRepository for PgCustomerMeterRepository {
    #[instrument(skip(self))]
    async fn find(&self, customer_id: Uuid, meter_id: Uuid) -> AppResult<Option<CustomerMeter>> {
        let row = sqlx::query_as::<sqlx::Postgres, CustomerMeterRow>(&format!(
            "SELECT {} FROM customer_meters WHERE customer_id = $1 AND meter_id = $2",
            CUSTOMER_METER_COLUMNS
        ))
        .bind(customer_id)
        .bind(meter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding customer meter: {}", e);
            AppError::Database(format!("Failed to find customer meter: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn get_or_create(&self, customer_id: Uuid, meter_id: Uuid) -> AppResult<CustomerMeter> {
        let fresh = CustomerMeter::new(customer_id, meter_id);

        let inserted = sqlx::query(
            r#"
            INSERT INTO customer_meters (id, customer_id, meter_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (customer_id, meter_id) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(customer_id)
        .bind(meter_id)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating customer meter: {}", e);
            AppError::Database(format!("Failed to create customer meter: {}", e))
        })?;

        if inserted.rows_affected() > 0 {
            debug!("Created customer meter {}", fresh.id);
            return Ok(fresh);
        }

        self.find(customer_id, meter_id).await?.ok_or_else(|| {
            AppError::Conflict(format!(
                "Customer meter {}:{} missing after insert",
                customer_id, meter_id
            ))
        })
    }

    #[instrument(skip(self, customer_meter), fields(id = %customer_meter.id))]
    async fn save(&self, customer_meter: &CustomerMeter) -> AppResult<CustomerMeter> {
        debug!(
            "Saving customer meter: consumed={}, credited={}, balance={}",
            customer_meter.consumed_units, customer_meter.credited_units, customer_meter.balance
        );

        let row = sqlx::query_as::<sqlx::Postgres, CustomerMeterRow>(&format!(
            r#"
            UPDATE customer_meters
            SET consumed_units = $2,
                credited_units = $3,
                balance = $4,
                last_balanced_event_id = $5,
                modified_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CUSTOMER_METER_COLUMNS
        ))
        .bind(customer_meter.id)
        .bind(customer_meter.consumed_units)
        .bind(customer_meter.credited_units)
        .bind(customer_meter.balance)
        .bind(customer_meter.last_balanced_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error saving customer meter {}: {}", customer_meter.id, e);
            AppError::Database(format!("Failed to save customer meter: {}", e))
        })?;

        row.map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("Customer meter {}", customer_meter.id)))
    }

    #[instrument(skip(self))]
    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<CustomerMeter>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CustomerMeterRow>(&format!(
            "SELECT {} FROM customer_meters WHERE customer_id = $1 ORDER BY created_at ASC",
            CUSTOMER_METER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing customer meters: {}", e);
            AppError::Database(format!("Failed to list customer meters: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CustomerMeterRow {
    id: Uuid,
    customer_id: Uuid,
    meter_id: Uuid,
    consumed_units: Decimal,
    credited_units: Decimal,
    balance: Decimal,
    last_balanced_event_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    modified_at: Option<DateTime<Utc>>,
}

impl From<CustomerMeterRow> for CustomerMeter {
    fn from(row: CustomerMeterRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            meter_id: row.meter_id,
            consumed_units: row.consumed_units,
            credited_units: row.credited_units,
            balance: row.balance,
            last_balanced_event_id: row.last_balanced_event_id,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}
