//! Window resolver
//!
//! A meter's current billing window runs from the most recent
//! `meter.reset` for the customer (or the beginning of history) up to the
//! newest qualifying event, the window tip. The tip's id is the
//! reconciliation checkpoint: while it does not move, nothing needs
//! recomputing.

use chrono::{DateTime, Utc};
use polar_core::{
    models::{Customer, Event, Meter},
    traits::{EventRepository, WindowQuery},
    AppResult,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Bounds of a customer meter's current window
#[derive(Debug, Clone, PartialEq)]
pub struct MeterWindow {
    /// `ingested_at` of the latest reset, inclusive; `None` for whole history
    pub start: Option<DateTime<Utc>>,

    /// Newest qualifying event
    pub tip: Event,
}

impl MeterWindow {
    pub fn query<'a>(&self, customer: &'a Customer, meter: &'a Meter) -> WindowQuery<'a> {
        WindowQuery::new(customer, meter, self.start)
    }
}

/// Resolves windows through an `EventRepository`
#[derive(Clone)]
pub struct WindowResolver {
    events: Arc<dyn EventRepository>,
}

impl WindowResolver {
    pub fn new(events: Arc<dyn EventRepository>) -> Self {
        Self { events }
    }

    /// Current window, or `None` when the customer has no qualifying events
    #[instrument(skip(self, customer, meter), fields(customer_id = %customer.id, meter_id = %meter.id))]
    pub async fn resolve_window(
        &self,
        customer: &Customer,
        meter: &Meter,
    ) -> AppResult<Option<MeterWindow>> {
        let start = self
            .events
            .latest_meter_reset(customer, meter)
            .await?
            .map(|reset| reset.ingested_at);

        let query = WindowQuery::new(customer, meter, start);
        let tip = self.events.latest_window_event(&query).await?;

        match &tip {
            Some(tip) => debug!("Window tip {} at {}", tip.id, tip.ingested_at),
            None => debug!("No qualifying events"),
        }

        Ok(tip.map(|tip| MeterWindow { start, tip }))
    }

    /// Newest qualifying event of the current window
    pub async fn resolve_window_tip(
        &self,
        customer: &Customer,
        meter: &Meter,
    ) -> AppResult<Option<Event>> {
        Ok(self
            .resolve_window(customer, meter)
            .await?
            .map(|window| window.tip))
    }

    /// Qualifying events of `window`, oldest first
    pub async fn window_events(
        &self,
        customer: &Customer,
        meter: &Meter,
        window: &MeterWindow,
    ) -> AppResult<Vec<Event>> {
        let query = window.query(customer, meter);
        self.events.window_events(&query, &window.tip).await
    }
}
