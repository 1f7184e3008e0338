//! Event repository implementation
//!
//! Read-only access to the event log. Customer events are reachable through
//! two indexes, `(customer_id, ingested_at)` and
//! `(organization_id, external_customer_id, ingested_at)`. An `OR` across
//! both defeats the planner, so single-row lookups run one
//! `ORDER BY ingested_at DESC LIMIT 1` sub-query per branch and keep the
//! newest of their union.
//!
//! The union only picks the correct row because each branch already returns
//! its own newest row. Do not widen the limit to fetch more than one event.

use chrono::{DateTime, Utc};
use polar_core::{
    models::{
        event::MAX_NUMERIC_DIGITS, system_events, Customer, Event, EventSource, FilterClause, FilterConjunction,
        FilterOperator, Meter, MeterFilter,
    },
    traits::{CustomerMatch, EventRepository, WindowQuery},
    AppError, AppResult,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, instrument};
use uuid::Uuid;

const EVENT_COLUMNS: &str = r#"id, organization_id, customer_id, external_customer_id, name, source, "timestamp", ingested_at, metadata, is_meter_credit"#;

/// Text that Postgres can cast to NUMERIC, mirroring `parse_numeric_text`
const NUMERIC_PATTERN: &str =
    r"'^[ \t\n\r\f\v]*[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)[ \t\n\r\f\v]*$'";

/// PostgreSQL implementation of EventRepository
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Create a new event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_latest(&self, mut query: QueryBuilder<'static, Postgres>) -> AppResult<Option<Event>> {
        let row = query
            .build_query_as::<EventRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error resolving latest event: {}", e);
                AppError::Database(format!("Failed to resolve latest event: {}", e))
            })?;

        Ok(row.map(Into::into))
    }
}

/// Condition an event must meet besides belonging to the customer
#[derive(Debug, Clone, Copy)]
enum EventSelector<'a> {
    /// `meter.reset` for the meter
    Reset(Uuid),
    /// Matching user event, or a reset/credit for the meter
    Qualifying(&'a Meter),
}

/// Newest event per customer branch, then newest overall
fn latest_event_query(
    branches: &[CustomerMatch<'_>],
    since: Option<DateTime<Utc>>,
    selector: EventSelector<'_>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(EVENT_COLUMNS).push(" FROM (");

    for (i, branch) in branches.iter().enumerate() {
        if i > 0 {
            qb.push(" UNION ");
        }
        qb.push("(SELECT ").push(EVENT_COLUMNS).push(" FROM events WHERE ");
        push_branch(&mut qb, branch);
        if let Some(since) = since {
            qb.push(" AND ingested_at >= ").push_bind(since);
        }
        qb.push(" AND ");
        push_selector(&mut qb, selector);
        qb.push(" ORDER BY ingested_at DESC, id DESC LIMIT 1)");
    }

    qb.push(") AS candidates ORDER BY ingested_at DESC, id DESC LIMIT 1");
    qb
}

/// Every qualifying event of the window, oldest first
fn window_events_query(
    branches: &[CustomerMatch<'_>],
    since: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
    meter: &Meter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(EVENT_COLUMNS).push(" FROM (");

    for (i, branch) in branches.iter().enumerate() {
        if i > 0 {
            qb.push(" UNION ");
        }
        qb.push("SELECT ").push(EVENT_COLUMNS).push(" FROM events WHERE ");
        push_branch(&mut qb, branch);
        if let Some(since) = since {
            qb.push(" AND ingested_at >= ").push_bind(since);
        }
        qb.push(" AND ingested_at <= ").push_bind(until);
        qb.push(" AND ");
        push_selector(&mut qb, EventSelector::Qualifying(meter));
    }

    qb.push(") AS window_events ORDER BY ingested_at ASC, id ASC");
    qb
}

fn push_branch(qb: &mut QueryBuilder<'static, Postgres>, branch: &CustomerMatch<'_>) {
    match branch {
        CustomerMatch::Id(customer_id) => {
            qb.push("customer_id = ").push_bind(*customer_id);
        }
        CustomerMatch::External {
            organization_id,
            external_id,
        } => {
            qb.push("organization_id = ")
                .push_bind(*organization_id)
                .push(" AND external_customer_id = ")
                .push_bind(external_id.to_string());
        }
    }
}

fn push_selector(qb: &mut QueryBuilder<'static, Postgres>, selector: EventSelector<'_>) {
    match selector {
        EventSelector::Reset(meter_id) => {
            push_system_event(qb, &[system_events::METER_RESET], meter_id);
        }
        EventSelector::Qualifying(meter) => {
            qb.push("((");
            push_user_filter(qb, &meter.filter);
            qb.push(") OR (");
            push_system_event(
                qb,
                &[system_events::METER_RESET, system_events::METER_CREDITED],
                meter.id,
            );
            qb.push("))");
        }
    }
}

fn push_system_event(qb: &mut QueryBuilder<'static, Postgres>, names: &[&str], meter_id: Uuid) {
    qb.push("source = ")
        .push_bind(EventSource::System.to_string())
        .push(" AND name IN (");
    let mut separated = qb.separated(", ");
    for name in names {
        separated.push_bind(name.to_string());
    }
    qb.push(") AND metadata->>'meter_id' = ")
        .push_bind(meter_id.to_string());
}

fn push_user_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &MeterFilter) {
    qb.push("source = ").push_bind(EventSource::User.to_string());
    if filter.clauses.is_empty() {
        return;
    }

    let joiner = match filter.conjunction {
        FilterConjunction::And => " AND ",
        FilterConjunction::Or => " OR ",
    };
    qb.push(" AND (");
    for (i, clause) in filter.clauses.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_clause(qb, clause);
    }
    qb.push(")");
}

/// A clause over an absent property is NULL and falls back to the
/// operator's default: true only for negations
fn push_clause(qb: &mut QueryBuilder<'static, Postgres>, clause: &FilterClause) {
    let negated = matches!(clause.operator, FilterOperator::Ne | FilterOperator::NotLike);

    qb.push("COALESCE(");
    if negated {
        qb.push("NOT ");
    }
    qb.push("(");
    match clause.operator {
        FilterOperator::Eq | FilterOperator::Ne => push_comparison(qb, clause, "="),
        FilterOperator::Gt => push_comparison(qb, clause, ">"),
        FilterOperator::Gte => push_comparison(qb, clause, ">="),
        FilterOperator::Lt => push_comparison(qb, clause, "<"),
        FilterOperator::Lte => push_comparison(qb, clause, "<="),
        FilterOperator::Like | FilterOperator::NotLike => push_like(qb, clause),
    }
    qb.push("), ")
        .push(if negated { "TRUE" } else { "FALSE" })
        .push(")");
}

/// Numeric comparison when both sides parse as numbers, byte-wise text otherwise
fn push_comparison(qb: &mut QueryBuilder<'static, Postgres>, clause: &FilterClause, op: &str) {
    let Some(text) = clause.value_text() else {
        qb.push("FALSE");
        return;
    };

    match clause.value_number() {
        Some(number) => {
            qb.push("CASE WHEN ");
            push_property(qb, clause);
            qb.push(" ~ ").push(NUMERIC_PATTERN).push(" AND length(regexp_replace(");
            push_property(qb, clause);
            qb.push(format!(", '[^0-9]', '', 'g')) <= {} THEN (", MAX_NUMERIC_DIGITS));
            push_property(qb, clause);
            qb.push(")::numeric ").push(op).push(" ").push_bind(number);
            qb.push(" ELSE ");
            push_property(qb, clause);
            qb.push(r#" COLLATE "C" "#).push(op).push(" ").push_bind(text);
            qb.push(" END");
        }
        None => {
            push_property(qb, clause);
            qb.push(r#" COLLATE "C" "#).push(op).push(" ").push_bind(text);
        }
    }
}

fn push_like(qb: &mut QueryBuilder<'static, Postgres>, clause: &FilterClause) {
    let Some(text) = clause.value_text() else {
        qb.push("FALSE");
        return;
    };

    push_property(qb, clause);
    qb.push(" ILIKE '%' || ")
        .push_bind(escape_like(&text))
        .push(" || '%'");
}

/// Scalar text of the clause's property; NULL when absent or not a scalar
fn push_property(qb: &mut QueryBuilder<'static, Postgres>, clause: &FilterClause) {
    match clause.metadata_path() {
        None => {
            qb.push("name");
        }
        Some(path) => {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            qb.push("(CASE WHEN jsonb_typeof(metadata #> ")
                .push_bind(segments.clone())
                .push("::text[]) IN ('string', 'number', 'boolean') THEN metadata #>> ")
                .push_bind(segments)
                .push("::text[] END)");
        }
    }
}

fn escape_like(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl EventRepository for PgEventRepository {
    #[instrument(skip(self, customer, meter), fields(customer_id = %customer.id, meter_id = %meter.id))]
    async fn latest_meter_reset(&self, customer: &Customer, meter: &Meter) -> AppResult<Option<Event>> {
        debug!("Finding latest meter reset");

        let branches = WindowQuery::new(customer, meter, None).customer_branches();
        let query = latest_event_query(&branches, None, EventSelector::Reset(meter.id));
        self.fetch_latest(query).await
    }

    #[instrument(skip(self, query), fields(customer_id = %query.customer.id, meter_id = %query.meter.id))]
    async fn latest_window_event(&self, query: &WindowQuery<'_>) -> AppResult<Option<Event>> {
        debug!("Resolving window tip since {:?}", query.since);

        let branches = query.customer_branches();
        let sql = latest_event_query(&branches, query.since, EventSelector::Qualifying(query.meter));
        self.fetch_latest(sql).await
    }

    #[instrument(skip(self, query, until), fields(customer_id = %query.customer.id, meter_id = %query.meter.id))]
    async fn window_events(&self, query: &WindowQuery<'_>, until: &Event) -> AppResult<Vec<Event>> {
        let branches = query.customer_branches();
        let mut sql = window_events_query(&branches, query.since, until.ingested_at, query.meter);

        let rows = sql
            .build_query_as::<EventRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error loading window events: {}", e);
                AppError::Database(format!("Failed to load window events: {}", e))
            })?;

        debug!("Loaded {} window events", rows.len());
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    organization_id: Uuid,
    customer_id: Option<Uuid>,
    external_customer_id: Option<String>,
    name: String,
    source: String,
    timestamp: DateTime<Utc>,
    ingested_at: DateTime<Utc>,
    metadata: Value,
    is_meter_credit: bool,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            customer_id: row.customer_id,
            external_customer_id: row.external_customer_id,
            name: row.name,
            source: EventSource::from_str(&row.source).unwrap_or(EventSource::User),
            timestamp: row.timestamp,
            ingested_at: row.ingested_at,
            metadata: row.metadata,
            is_meter_credit: row.is_meter_credit,
        }
    }
}
