//! Event window lookups against a live PostgreSQL database
//!
//! Run with `DATABASE_URL=postgresql://... cargo test -p polar-db -- --ignored`

mod common;

use chrono::{DateTime, Duration, Utc};
use common::*;
use polar_core::{
    models::{
        system_events, Customer, Event, EventSource, FilterClause, FilterConjunction,
        FilterOperator, Meter, MeterFilter,
    },
    traits::{EventRepository, MeterDefinition, WindowQuery},
};
use polar_db::{PgEventRepository, PgPool};
use serde_json::{json, Value};
use uuid::Uuid;

struct Fixture {
    pool: PgPool,
    repo: PgEventRepository,
    organization_id: Uuid,
    customer: Customer,
    base: DateTime<Utc>,
}

async fn fixture(external_id: Option<&str>) -> Fixture {
    let pool = pool().await;
    let organization_id = insert_organization(&pool).await;
    let customer_id = insert_customer(&pool, organization_id, external_id).await;

    Fixture {
        repo: PgEventRepository::new(pool.clone()),
        pool,
        organization_id,
        customer: Customer {
            id: customer_id,
            organization_id,
            external_id: external_id.map(str::to_string),
            ..Default::default()
        },
        // Whole seconds survive the round trip through TIMESTAMPTZ exactly
        base: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap(),
    }
}

impl Fixture {
    fn meter(&self, filter: MeterFilter) -> Meter {
        Meter {
            organization_id: self.organization_id,
            name: "Calls".to_string(),
            filter,
            ..Default::default()
        }
    }

    fn at(&self, second: i64) -> DateTime<Utc> {
        self.base + Duration::seconds(second)
    }

    /// User event recorded against the customer id
    fn user_event(&self, second: i64, name: &str, metadata: Value) -> Event {
        Event {
            id: Uuid::now_v7(),
            organization_id: self.organization_id,
            customer_id: Some(self.customer.id),
            name: name.to_string(),
            timestamp: self.at(second),
            ingested_at: self.at(second),
            metadata,
            ..Default::default()
        }
    }

    /// User event recorded only against an external customer id
    fn external_event(&self, second: i64, external_id: &str) -> Event {
        Event {
            customer_id: None,
            external_customer_id: Some(external_id.to_string()),
            ..self.user_event(second, "api.call", json!({}))
        }
    }

    fn reset_event(&self, second: i64, meter_id: Uuid) -> Event {
        Event {
            source: EventSource::System,
            ..self.user_event(
                second,
                system_events::METER_RESET,
                json!({ "meter_id": meter_id.to_string() }),
            )
        }
    }

    async fn insert(&self, events: &[&Event]) {
        for event in events {
            insert_event(&self.pool, event).await;
        }
    }
}

fn name_filter(name: &str) -> MeterFilter {
    MeterFilter {
        conjunction: FilterConjunction::And,
        clauses: vec![FilterClause::new("name", FilterOperator::Eq, json!(name))],
    }
}

fn ids(events: &[Event]) -> Vec<Uuid> {
    events.iter().map(|e| e.id).collect()
}

#[tokio::test]
#[ignore] // Requires database
async fn test_single_branch_latest_event() {
    let f = fixture(None).await;
    let meter = f.meter(name_filter("api.call"));

    let first = f.user_event(1, "api.call", json!({}));
    let second = f.user_event(2, "api.call", json!({}));
    let unmatched = f.user_event(3, "api.other", json!({}));
    let stranger = f.external_event(4, "someone_else");
    f.insert(&[&first, &second, &unmatched, &stranger]).await;

    let query = WindowQuery::new(&f.customer, &meter, None);
    let tip = f.repo.latest_window_event(&query).await.unwrap().unwrap();
    assert_eq!(tip.id, second.id);
    assert_eq!(tip.ingested_at, second.ingested_at);

    let window = f.repo.window_events(&query, &tip).await.unwrap();
    assert_eq!(ids(&window), vec![first.id, second.id]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_external_branch_newer_event_wins() {
    let f = fixture(Some("ext_1")).await;
    let meter = f.meter(name_filter("api.call"));

    let by_id = f.user_event(1, "api.call", json!({}));
    let by_external = f.external_event(2, "ext_1");

    // Same external id in another organization belongs to someone else
    let other_organization = insert_organization(&f.pool).await;
    let foreign = Event {
        organization_id: other_organization,
        ..f.external_event(3, "ext_1")
    };
    f.insert(&[&by_id, &by_external, &foreign]).await;

    let query = WindowQuery::new(&f.customer, &meter, None);
    let tip = f.repo.latest_window_event(&query).await.unwrap().unwrap();
    assert_eq!(tip.id, by_external.id);

    let window = f.repo.window_events(&query, &tip).await.unwrap();
    assert_eq!(ids(&window), vec![by_id.id, by_external.id]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_reset_bounds_the_window() {
    let f = fixture(None).await;
    let meter = f.meter(MeterFilter::default());

    let before = f.user_event(1, "api.call", json!({}));
    let reset = f.reset_event(2, meter.id);
    let other_reset = f.reset_event(4, Uuid::new_v4());
    f.insert(&[&before, &reset, &other_reset]).await;

    let latest_reset = f.repo.latest_meter_reset(&f.customer, &meter).await.unwrap().unwrap();
    assert_eq!(latest_reset.id, reset.id);

    // Right after a reset the reset itself is the tip
    let query = WindowQuery::new(&f.customer, &meter, Some(latest_reset.ingested_at));
    let tip = f.repo.latest_window_event(&query).await.unwrap().unwrap();
    assert_eq!(tip.id, reset.id);
    let window = f.repo.window_events(&query, &tip).await.unwrap();
    assert_eq!(ids(&window), vec![reset.id]);

    let after = f.user_event(3, "api.call", json!({}));
    f.insert(&[&after]).await;

    let tip = f.repo.latest_window_event(&query).await.unwrap().unwrap();
    assert_eq!(tip.id, after.id);
    let window = f.repo.window_events(&query, &tip).await.unwrap();
    assert_eq!(ids(&window), vec![reset.id, after.id]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_event_with_both_ids_counted_once() {
    let f = fixture(Some("ext_2")).await;
    let meter = f.meter(name_filter("api.call"));

    let both = Event {
        external_customer_id: Some("ext_2".to_string()),
        ..f.user_event(1, "api.call", json!({}))
    };
    f.insert(&[&both]).await;

    let query = WindowQuery::new(&f.customer, &meter, None);
    let tip = f.repo.latest_window_event(&query).await.unwrap().unwrap();
    assert_eq!(tip.id, both.id);

    let window = f.repo.window_events(&query, &tip).await.unwrap();
    assert_eq!(ids(&window), vec![both.id]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pushed_down_filters_agree_with_in_memory_matching() {
    let f = fixture(None).await;

    let values = [
        Some(json!(120)),
        Some(json!(7.5)),
        Some(json!("1_000")),
        Some(json!("1e3")),
        Some(json!(" 42 ")),
        Some(json!("5.")),
        Some(json!("-0.5")),
        Some(json!("abc")),
        Some(json!("ABCD")),
        Some(json!(true)),
        Some(json!({ "nested": 1 })),
        Some(json!(["a"])),
        None,
    ];
    let events: Vec<Event> = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let metadata = match value {
                Some(value) => json!({ "tokens": value }),
                None => json!({}),
            };
            f.user_event(i as i64, "llm", metadata)
        })
        .collect();
    f.insert(&events.iter().collect::<Vec<_>>()).await;
    let until = events.last().unwrap();

    let operators = [
        FilterOperator::Eq,
        FilterOperator::Ne,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Like,
        FilterOperator::NotLike,
    ];
    let expected_values = [json!(42), json!(100), json!("1"), json!("abc"), json!(true)];

    for operator in operators {
        for expected in &expected_values {
            let meter = f.meter(MeterFilter {
                conjunction: FilterConjunction::And,
                clauses: vec![FilterClause::new("metadata.tokens", operator, expected.clone())],
            });
            let query = WindowQuery::new(&f.customer, &meter, None);

            let window = f.repo.window_events(&query, until).await.unwrap();
            let in_memory: Vec<Uuid> = events
                .iter()
                .filter(|e| meter.matches(e))
                .map(|e| e.id)
                .collect();

            assert_eq!(ids(&window), in_memory, "{:?} {}", operator, expected);
        }
    }
}
