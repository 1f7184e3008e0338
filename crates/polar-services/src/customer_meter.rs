//! Customer meter reconciler
//!
//! Recomputes a customer's usage of a meter from the event log:
//! - Resolve the current window and its tip
//! - Skip when the stored checkpoint already equals the tip
//! - Otherwise aggregate matching user events, sum credits with the
//!   clamped running sum, and persist figures plus the new checkpoint
//!
//! Reconciliation of one `(customer, meter)` pair is serialized through
//! the `customer_meter:{customer_id}:{meter_id}` lock; different meters of
//! the same customer proceed independently.

use chrono::Utc;
use polar_cache::keys;
use polar_core::{
    config::LockTimings,
    models::{Customer, CustomerMeter, Event, Meter, MeterBalance},
    traits::{
        CustomerMeterRepository, CustomerRepository, EventRepository, Locker, MeterDefinition,
        MeterRepository, StateNotifier,
    },
    AppError, AppResult,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::constants::CUSTOMER_METER_LOCK;
use crate::lock::with_lock;
use crate::running_sum::clamped_running_sum;
use crate::window::WindowResolver;

/// Figures for a window's events.
///
/// Consumed units aggregate the user events `definition` matches; credited
/// units are the clamped running sum of the credit events for `meter_id`,
/// in the order given.
pub fn compute_meter_balance<M>(definition: &M, meter_id: Uuid, events: &[Event]) -> MeterBalance
where
    M: MeterDefinition + ?Sized,
{
    let consumed = consumed_units(definition, events);
    let credited = clamped_running_sum(credit_units(events, meter_id, |_| true));
    MeterBalance::new(consumed, credited)
}

/// Whole units of the balance that may carry into the next period.
///
/// Rollover and regular credits are clamped independently; the result is
/// never negative and never more than was credited as rollover.
pub fn compute_rollover_units<M>(definition: &M, meter_id: Uuid, events: &[Event]) -> i64
where
    M: MeterDefinition + ?Sized,
{
    let consumed = consumed_units(definition, events);
    let regular = clamped_running_sum(credit_units(events, meter_id, |e| !e.is_rollover()));
    let rollover = clamped_running_sum(credit_units(events, meter_id, Event::is_rollover));

    let balance = regular + rollover - consumed;
    balance
        .trunc()
        .min(rollover)
        .max(Decimal::ZERO)
        .trunc()
        .to_i64()
        .unwrap_or(i64::MAX)
}

fn consumed_units<M>(definition: &M, events: &[Event]) -> Decimal
where
    M: MeterDefinition + ?Sized,
{
    let matching: Vec<&Event> = events.iter().filter(|e| definition.matches(e)).collect();
    definition.aggregate(&matching)
}

fn credit_units<'a>(
    events: &'a [Event],
    meter_id: Uuid,
    keep: impl Fn(&Event) -> bool + 'a,
) -> impl Iterator<Item = Decimal> + 'a {
    events
        .iter()
        .filter(move |e| e.is_credit_for(meter_id) && keep(*e))
        .filter_map(Event::units)
}

/// Outcome of reconciling every meter of a customer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Meters reconciled without error
    pub reconciled: usize,
    /// Of those, meters whose figures were recomputed
    pub changed: usize,
    /// Meters whose reconciliation failed
    pub failed: usize,
}

impl ReconcileSummary {
    #[inline]
    pub fn has_changes(&self) -> bool {
        self.changed > 0
    }
}

/// Customer meter service
pub struct CustomerMeterService {
    resolver: WindowResolver,
    meters: Arc<dyn MeterRepository>,
    customers: Arc<dyn CustomerRepository>,
    customer_meters: Arc<dyn CustomerMeterRepository>,
    locker: Arc<dyn Locker>,
    notifier: Arc<dyn StateNotifier>,
    lock_timings: LockTimings,
}

impl CustomerMeterService {
    /// Create a new customer meter service
    pub fn new(
        events: Arc<dyn EventRepository>,
        meters: Arc<dyn MeterRepository>,
        customers: Arc<dyn CustomerRepository>,
        customer_meters: Arc<dyn CustomerMeterRepository>,
        locker: Arc<dyn Locker>,
        notifier: Arc<dyn StateNotifier>,
    ) -> Self {
        Self {
            resolver: WindowResolver::new(events),
            meters,
            customers,
            customer_meters,
            locker,
            notifier,
            lock_timings: CUSTOMER_METER_LOCK,
        }
    }

    /// Override the customer meter lock timings
    pub fn with_lock_timings(mut self, lock_timings: LockTimings) -> Self {
        self.lock_timings = lock_timings;
        self
    }

    pub fn resolver(&self) -> &WindowResolver {
        &self.resolver
    }

    /// Reconcile one meter for one customer.
    ///
    /// Returns the stored row (if any) and whether its figures changed.
    /// Fails with `AppError::LockTimeout` when another reconciliation of the
    /// same pair holds the lock; nothing is written then.
    #[instrument(skip(self, customer, meter), fields(customer_id = %customer.id, meter_id = %meter.id))]
    pub async fn reconcile_one(
        &self,
        customer: &Customer,
        meter: &Meter,
    ) -> AppResult<(Option<CustomerMeter>, bool)> {
        let key = keys::customer_meter_lock_key(customer.id, meter.id);
        with_lock(self.locker.as_ref(), &key, self.lock_timings, || {
            self.reconcile_locked(customer, meter)
        })
        .await
    }

    async fn reconcile_locked(
        &self,
        customer: &Customer,
        meter: &Meter,
    ) -> AppResult<(Option<CustomerMeter>, bool)> {
        let Some(window) = self.resolver.resolve_window(customer, meter).await? else {
            let existing = self.customer_meters.find(customer.id, meter.id).await?;
            return Ok((existing, false));
        };

        let mut customer_meter = self
            .customer_meters
            .get_or_create(customer.id, meter.id)
            .await?;

        if customer_meter.is_balanced_at(window.tip.id) {
            debug!("Already balanced at {}", window.tip.id);
            return Ok((Some(customer_meter), false));
        }

        let events = self.resolver.window_events(customer, meter, &window).await?;
        let balance = compute_meter_balance(meter, meter.id, &events);

        debug!(
            "Recomputed from {} events: consumed={}, credited={}, balance={}",
            events.len(),
            balance.consumed_units,
            balance.credited_units,
            balance.balance
        );

        customer_meter.apply(balance, window.tip.id);
        let saved = self.customer_meters.save(&customer_meter).await?;

        Ok((Some(saved), true))
    }

    /// Reconcile every active meter of the customer's organization.
    ///
    /// A failing meter is logged and counted, never aborting the others.
    /// When anything changed, `meters_updated_at` is stamped and the
    /// customer state change is signalled.
    #[instrument(skip(self, customer), fields(customer_id = %customer.id))]
    pub async fn reconcile_customer(&self, customer: &Customer) -> AppResult<ReconcileSummary> {
        let meters = self
            .meters
            .list_active_by_organization(customer.organization_id)
            .await?;

        let mut summary = ReconcileSummary::default();
        for meter in &meters {
            match self.reconcile_one(customer, meter).await {
                Ok((_, changed)) => {
                    summary.reconciled += 1;
                    if changed {
                        summary.changed += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to reconcile meter {}: {}", meter.id, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.has_changes() {
            self.customers
                .touch_meters_updated_at(customer.id, Utc::now())
                .await?;
            self.notifier.customer_state_changed(customer).await;
        }

        info!(
            "Reconciled {} meters: {} changed, {} failed",
            summary.reconciled, summary.changed, summary.failed
        );
        Ok(summary)
    }

    /// Load the customer, then reconcile all of its meters
    pub async fn reconcile_customer_by_id(&self, customer_id: Uuid) -> AppResult<ReconcileSummary> {
        let customer = self
            .customers
            .find_by_id(customer_id)
            .await?
            .ok_or_else(|| AppError::CustomerNotFound(customer_id.to_string()))?;

        self.reconcile_customer(&customer).await
    }

    /// Whole units of the current balance eligible to roll over
    #[instrument(skip(self, customer, meter), fields(customer_id = %customer.id, meter_id = %meter.id))]
    pub async fn rollover_units(&self, customer: &Customer, meter: &Meter) -> AppResult<i64> {
        let Some(window) = self.resolver.resolve_window(customer, meter).await? else {
            return Ok(0);
        };

        let events = self.resolver.window_events(customer, meter, &window).await?;
        Ok(compute_rollover_units(meter, meter.id, &events))
    }

    /// Stored aggregates of all the customer's meters
    pub async fn list_customer_meters(&self, customer: &Customer) -> AppResult<Vec<CustomerMeter>> {
        self.customer_meters.list_by_customer(customer.id).await
    }
}
