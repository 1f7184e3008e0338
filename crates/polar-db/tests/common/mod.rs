//! Fixtures for repository tests against a live PostgreSQL database

#![allow(dead_code)]

use polar_core::{config::DatabaseConfig, models::Event};
use polar_db::{create_pool, run_migrations, PgPool};
use uuid::Uuid;

pub async fn pool() -> PgPool {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        max_connections: 5,
        min_connections: 1,
        acquire_timeout_secs: 5,
        idle_timeout_secs: 60,
        run_migrations: true,
    };
    let pool = create_pool(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn insert_organization(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name, slug) VALUES ($1, 'Test', $2)")
        .bind(id)
        .bind(id.to_string())
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn insert_customer(pool: &PgPool, organization_id: Uuid, external_id: Option<&str>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO customers (id, organization_id, external_id) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(organization_id)
        .bind(external_id)
        .execute(pool)
        .await
        .unwrap();
    id
}

/// Store an event as ingestion would, keeping its `ingested_at`
pub async fn insert_event(pool: &PgPool, event: &Event) {
    sqlx::query(
        r#"
        INSERT INTO events (
            id, organization_id, customer_id, external_customer_id, name, source,
            "timestamp", ingested_at, metadata, is_meter_credit
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.id)
    .bind(event.organization_id)
    .bind(event.customer_id)
    .bind(&event.external_customer_id)
    .bind(&event.name)
    .bind(event.source.to_string())
    .bind(event.timestamp)
    .bind(event.ingested_at)
    .bind(&event.metadata)
    .bind(event.is_meter_credit)
    .execute(pool)
    .await
    .unwrap();
}
