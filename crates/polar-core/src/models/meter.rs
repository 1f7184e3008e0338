//! Meter model
//!
//! A meter is an organization-scoped usage counter: a filter selecting which
//! user events count, and an aggregation combining them into a quantity.
//!
//! The filter and aggregation here are the plain structured form persisted
//! as JSON; the reconciler only ever goes through [`MeterDefinition`].
//!
//! [`MeterDefinition`]: crate::traits::MeterDefinition

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

use super::event::{decimal_from_value, Event, EventSource};
use crate::traits::MeterDefinition;

/// Comparison applied by a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring match
    Like,
    NotLike,
}

/// How the clauses of a filter combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterConjunction {
    #[default]
    And,
    Or,
}

/// A single `property operator value` condition
///
/// `property` is either `name` or a dotted metadata path, optionally
/// prefixed with `metadata.`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub property: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterClause {
    pub fn new(property: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            property: property.into(),
            operator,
            value,
        }
    }

    /// Metadata path for this clause, or `None` when it targets the event name
    pub fn metadata_path(&self) -> Option<&str> {
        if self.property == "name" {
            None
        } else {
            Some(
                self.property
                    .strip_prefix("metadata.")
                    .unwrap_or(&self.property),
            )
        }
    }

    /// Expected value as text, `None` for arrays, objects and null
    pub fn value_text(&self) -> Option<String> {
        as_text(&self.value)
    }

    /// Expected value as a number, when it is one
    pub fn value_number(&self) -> Option<Decimal> {
        decimal_from_value(&self.value)
    }

    pub fn matches(&self, event: &Event) -> bool {
        let name_value;
        let actual = match self.metadata_path() {
            None => {
                name_value = Value::String(event.name.clone());
                Some(&name_value)
            }
            Some(path) => event.metadata_value(path),
        };

        let Some(actual) = actual else {
            // Absent properties only satisfy negative operators
            return matches!(self.operator, FilterOperator::Ne | FilterOperator::NotLike);
        };

        match self.operator {
            FilterOperator::Eq => compare(actual, &self.value) == Some(Ordering::Equal),
            FilterOperator::Ne => compare(actual, &self.value) != Some(Ordering::Equal),
            FilterOperator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Like => contains_ignore_case(actual, &self.value),
            FilterOperator::NotLike => !contains_ignore_case(actual, &self.value),
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric comparison when both sides are numeric, text comparison otherwise
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (decimal_from_value(actual), decimal_from_value(expected)) {
        return Some(a.cmp(&b));
    }
    Some(as_text(actual)?.cmp(&as_text(expected)?))
}

fn contains_ignore_case(actual: &Value, pattern: &Value) -> bool {
    match (as_text(actual), as_text(pattern)) {
        (Some(a), Some(p)) => a.to_lowercase().contains(&p.to_lowercase()),
        _ => false,
    }
}

/// Which user events count towards a meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MeterFilter {
    #[serde(default)]
    pub conjunction: FilterConjunction,
    #[serde(default)]
    pub clauses: Vec<FilterClause>,
}

impl MeterFilter {
    /// An empty filter matches every event
    pub fn matches(&self, event: &Event) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        match self.conjunction {
            FilterConjunction::And => self.clauses.iter().all(|c| c.matches(event)),
            FilterConjunction::Or => self.clauses.iter().any(|c| c.matches(event)),
        }
    }
}

/// How matching events combine into a quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "func", rename_all = "lowercase")]
pub enum MeterAggregation {
    #[default]
    Count,
    Sum { property: String },
    Max { property: String },
    Min { property: String },
    Avg { property: String },
    /// Distinct scalar values, compared by their text form
    Unique { property: String },
}

impl MeterAggregation {
    /// Events without a numeric value at `property` are skipped, except by
    /// `Unique`, which skips only events without a scalar there
    pub fn aggregate(&self, events: &[&Event]) -> Decimal {
        let values = |property: &str| -> Vec<Decimal> {
            let path = metadata_path(property);
            events
                .iter()
                .filter_map(|e| e.metadata_value(path).and_then(decimal_from_value))
                .collect()
        };

        match self {
            MeterAggregation::Count => Decimal::from(events.len() as u64),
            MeterAggregation::Sum { property } => values(property).into_iter().sum(),
            MeterAggregation::Max { property } => {
                values(property).into_iter().max().unwrap_or(Decimal::ZERO)
            }
            MeterAggregation::Min { property } => {
                values(property).into_iter().min().unwrap_or(Decimal::ZERO)
            }
            MeterAggregation::Avg { property } => {
                let values = values(property);
                if values.is_empty() {
                    Decimal::ZERO
                } else {
                    values.iter().sum::<Decimal>() / Decimal::from(values.len() as u64)
                }
            }
            MeterAggregation::Unique { property } => {
                let path = metadata_path(property);
                let distinct: HashSet<String> = events
                    .iter()
                    .filter_map(|e| e.metadata_value(path).and_then(as_text))
                    .collect();
                Decimal::from(distinct.len() as u64)
            }
        }
    }
}

fn metadata_path(property: &str) -> &str {
    property.strip_prefix("metadata.").unwrap_or(property)
}

/// Meter entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meter {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub filter: MeterFilter,
    pub aggregation: MeterAggregation,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Meter {
    #[inline]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

impl MeterDefinition for Meter {
    fn matches(&self, event: &Event) -> bool {
        event.source == EventSource::User && self.filter.matches(event)
    }

    fn aggregate(&self, events: &[&Event]) -> Decimal {
        self.aggregation.aggregate(events)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            name: String::new(),
            filter: MeterFilter::default(),
            aggregation: MeterAggregation::Count,
            created_at: Utc::now(),
            archived_at: None,
        }
    }
}
