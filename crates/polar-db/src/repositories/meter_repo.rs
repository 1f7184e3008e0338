//! Meter repository implementation

use chrono::{DateTime, Utc};
use polar_core::{
    models::{Meter, MeterAggregation, MeterFilter},
    traits::{MeterRepository, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of MeterRepository
pub struct PgMeterRepository {
    pool: PgPool,
}

impl PgMeterRepository {
    /// Create a new meter repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository<Meter, Uuid> for PgMeterRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Meter>> {
        debug!("Finding meter by id: {}", id);

        let row = sqlx::query_as::<sqlx::Postgres, MeterRow>(
            r#"
            SELECT id, organization_id, name, filter, aggregation, created_at, archived_at
            FROM meters
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding meter {}: {}", id, e);
            AppError::Database(format!("Failed to find meter: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl MeterRepository for PgMeterRepository {
    #[instrument(skip(self))]
    async fn list_active_by_organization(&self, organization_id: Uuid) -> AppResult<Vec<Meter>> {
        let rows = sqlx::query_as::<sqlx::Postgres, MeterRow>(
            r#"
            SELECT id, organization_id, name, filter, aggregation, created_at, archived_at
            FROM meters
            WHERE organization_id = $1
              AND archived_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing meters for {}: {}", organization_id, e);
            AppError::Database(format!("Failed to list meters: {}", e))
        })?;

        debug!("Found {} active meters", rows.len());
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct MeterRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    filter: Json<MeterFilter>,
    aggregation: Json<MeterAggregation>,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl From<MeterRow> for Meter {
    fn from(row: MeterRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            filter: row.filter.0,
            aggregation: row.aggregation.0,
            created_at: row.created_at,
            archived_at: row.archived_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polar_core::models::{FilterClause, FilterOperator};
    use serde_json::json;

    #[test]
    fn test_row_conversion_unwraps_json() {
        let filter = MeterFilter {
            clauses: vec![FilterClause::new("name", FilterOperator::Eq, json!("api.call"))],
            ..Default::default()
        };
        let row = MeterRow {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "API calls".to_string(),
            filter: Json(filter.clone()),
            aggregation: Json(MeterAggregation::Sum {
                property: "tokens".to_string(),
            }),
            created_at: Utc::now(),
            archived_at: None,
        };

        let meter: Meter = row.into();
        assert_eq!(meter.filter, filter);
        assert!(!meter.is_archived());
    }
}
