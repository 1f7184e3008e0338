//! Event model
//!
//! Events are append-only facts ingested elsewhere. The metering engine only
//! reads them: user events feed meter aggregations, system events reset or
//! credit a meter.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Names of the system events the engine understands
pub mod system_events {
    /// Starts a new window for the meter named in `metadata.meter_id`
    pub const METER_RESET: &str = "meter.reset";

    /// Adds `metadata.units` (signed) to the meter named in `metadata.meter_id`
    pub const METER_CREDITED: &str = "meter.credited";
}

/// Event source enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Sent by the merchant through the ingestion API
    #[default]
    User,
    /// Produced by Polar itself (resets, credits, adjustments)
    System,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::User => write!(f, "user"),
            EventSource::System => write!(f, "system"),
        }
    }
}

impl EventSource {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(EventSource::User),
            "system" => Some(EventSource::System),
            _ => None,
        }
    }
}

/// Event entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub external_customer_id: Option<String>,
    pub name: String,
    pub source: EventSource,

    /// Client-supplied time; not used for ordering
    pub timestamp: DateTime<Utc>,

    /// Monotonic ordering key assigned at ingestion
    pub ingested_at: DateTime<Utc>,

    pub metadata: Value,
    pub is_meter_credit: bool,
}

impl Event {
    /// Look up a metadata value by dotted path (`"usage.tokens"`)
    pub fn metadata_value(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.metadata, |value, segment| value.get(segment))
    }

    /// Meter targeted by a system event
    pub fn meter_id(&self) -> Option<Uuid> {
        self.metadata
            .get("meter_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Signed units carried by a meter credit event
    pub fn units(&self) -> Option<Decimal> {
        self.metadata.get("units").and_then(decimal_from_value)
    }

    /// Whether a credit event's units roll over into the next period
    pub fn is_rollover(&self) -> bool {
        self.metadata
            .get("rollover")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_meter_reset(&self, meter_id: Uuid) -> bool {
        self.source == EventSource::System
            && self.name == system_events::METER_RESET
            && self.meter_id() == Some(meter_id)
    }

    /// Credit event for the given meter
    pub fn is_credit_for(&self, meter_id: Uuid) -> bool {
        self.is_meter_credit && self.meter_id() == Some(meter_id)
    }

    /// System event that changes the given meter's balance
    pub fn affects_meter(&self, meter_id: Uuid) -> bool {
        self.source == EventSource::System
            && (self.name == system_events::METER_RESET
                || self.name == system_events::METER_CREDITED)
            && self.meter_id() == Some(meter_id)
    }
}

impl Default for Event {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id: Uuid::nil(),
            customer_id: None,
            external_customer_id: None,
            name: String::new(),
            source: EventSource::User,
            timestamp: now,
            ingested_at: now,
            metadata: Value::Object(Default::default()),
            is_meter_credit: false,
        }
    }
}

/// Most digits a numeric string may carry and still compare as a number
pub const MAX_NUMERIC_DIGITS: usize = 28;

/// Whitespace allowed around a numeric string
pub const NUMERIC_SPACE: [char; 6] = [' ', '\t', '\n', '\r', '\x0B', '\x0C'];

/// Read a JSON number or numeric string as a Decimal
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                let repr = n.to_string();
                Decimal::from_str(&repr)
                    .or_else(|_| Decimal::from_scientific(&repr))
                    .ok()
            }
        }
        Value::String(s) => parse_numeric_text(s),
        _ => None,
    }
}

/// Parse a plain decimal string: optional sign, digits with an optional
/// fraction, surrounding whitespace. The event filter pushdown casts exactly
/// this grammar to NUMERIC, so both sides agree on what is a number.
pub fn parse_numeric_text(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim_matches(&NUMERIC_SPACE[..]);
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) {
        return None;
    }
    if int.len() + frac.len() > MAX_NUMERIC_DIGITS {
        return None;
    }

    let int = if int.is_empty() { "0" } else { int };
    let value = if frac.is_empty() {
        Decimal::from_str(int)
    } else {
        Decimal::from_str(&format!("{}.{}", int, frac))
    }
    .ok()?;

    Some(if negative { -value } else { value })
}
