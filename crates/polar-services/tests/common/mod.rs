//! In-memory collaborators for service tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use polar_core::{
    models::{
        system_events, Account, AccountCredit, Customer, CustomerMeter, Event, EventSource, Meter,
        Organization,
    },
    traits::{
        AccountCreditRepository, AccountRepository, CreditUsage, CustomerMeterRepository,
        CustomerRepository, EventRepository, MeterRepository, Repository, StateNotifier,
        WindowQuery,
    },
    AppError, AppResult,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

// ==================== Events ====================

/// Event log with strictly increasing `ingested_at`
#[derive(Default)]
pub struct InMemoryEvents {
    events: Mutex<Vec<Event>>,
    window_loads: AtomicUsize,
}

impl InMemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, stamping the next ingestion time
    pub fn ingest(&self, mut event: Event) -> Event {
        let mut events = self.events.lock();
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now);
        event.ingested_at = base + Duration::seconds(events.len() as i64);
        events.push(event.clone());
        event
    }

    /// Number of times window events were loaded
    pub fn window_loads(&self) -> usize {
        self.window_loads.load(Ordering::SeqCst)
    }

    fn newest(&self, keep: impl Fn(&Event) -> bool) -> Option<Event> {
        self.events
            .lock()
            .iter()
            .filter(|&e| keep(e))
            .max_by_key(|e| (e.ingested_at, e.id))
            .cloned()
    }
}

#[async_trait]
impl EventRepository for InMemoryEvents {
    async fn latest_meter_reset(&self, customer: &Customer, meter: &Meter) -> AppResult<Option<Event>> {
        let query = WindowQuery::new(customer, meter, None);
        Ok(self.newest(|e| query.belongs_to_customer(e) && e.is_meter_reset(meter.id)))
    }

    async fn latest_window_event(&self, query: &WindowQuery<'_>) -> AppResult<Option<Event>> {
        // Same shape as the SQL: newest per branch, then newest overall
        let tips: Vec<Event> = query
            .customer_branches()
            .iter()
            .filter_map(|branch| {
                self.newest(|e| branch.matches(e) && query.within_window(e) && query.qualifies(e))
            })
            .collect();
        Ok(tips.into_iter().max_by_key(|e| (e.ingested_at, e.id)))
    }

    async fn window_events(&self, query: &WindowQuery<'_>, until: &Event) -> AppResult<Vec<Event>> {
        self.window_loads.fetch_add(1, Ordering::SeqCst);
        let mut events: Vec<Event> = self
            .events
            .lock()
            .iter()
            .filter(|e| {
                query.belongs_to_customer(e)
                    && query.within_window(e)
                    && e.ingested_at <= until.ingested_at
                    && query.qualifies(e)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.ingested_at, e.id));
        Ok(events)
    }
}

// ==================== Meters and customers ====================

#[derive(Default)]
pub struct InMemoryMeters {
    meters: Mutex<Vec<Meter>>,
}

impl InMemoryMeters {
    pub fn new(meters: Vec<Meter>) -> Self {
        Self {
            meters: Mutex::new(meters),
        }
    }
}

#[async_trait]
impl Repository<Meter, Uuid> for InMemoryMeters {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Meter>> {
        Ok(self.meters.lock().iter().find(|m| m.id == id).cloned())
    }
}

#[async_trait]
impl MeterRepository for InMemoryMeters {
    async fn list_active_by_organization(&self, organization_id: Uuid) -> AppResult<Vec<Meter>> {
        let mut meters: Vec<Meter> = self
            .meters
            .lock()
            .iter()
            .filter(|m| m.organization_id == organization_id && !m.is_archived())
            .cloned()
            .collect();
        meters.sort_by_key(|m| m.created_at);
        Ok(meters)
    }
}

#[derive(Default)]
pub struct InMemoryCustomers {
    customers: Mutex<HashMap<Uuid, Customer>>,
}

impl InMemoryCustomers {
    pub fn new(customers: Vec<Customer>) -> Self {
        Self {
            customers: Mutex::new(customers.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Customer> {
        self.customers.lock().get(&id).cloned()
    }
}

#[async_trait]
impl Repository<Customer, Uuid> for InMemoryCustomers {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Customer>> {
        Ok(self.get(id))
    }
}

#[async_trait]
impl CustomerRepository for InMemoryCustomers {
    async fn touch_meters_updated_at(&self, customer_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut customers = self.customers.lock();
        let customer = customers
            .get_mut(&customer_id)
            .ok_or_else(|| AppError::CustomerNotFound(customer_id.to_string()))?;
        customer.meters_updated_at = Some(at);
        Ok(())
    }
}

// ==================== Customer meters ====================

#[derive(Default)]
pub struct InMemoryCustomerMeters {
    rows: Mutex<HashMap<(Uuid, Uuid), CustomerMeter>>,
    failing_meters: Mutex<HashSet<Uuid>>,
    saves: AtomicUsize,
}

impl InMemoryCustomerMeters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every access for `meter_id` fail with a database error
    pub fn fail_for(&self, meter_id: Uuid) {
        self.failing_meters.lock().insert(meter_id);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, customer_id: Uuid, meter_id: Uuid) -> Option<CustomerMeter> {
        self.rows.lock().get(&(customer_id, meter_id)).cloned()
    }

    fn check(&self, meter_id: Uuid) -> AppResult<()> {
        if self.failing_meters.lock().contains(&meter_id) {
            return Err(AppError::Database("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CustomerMeterRepository for InMemoryCustomerMeters {
    async fn find(&self, customer_id: Uuid, meter_id: Uuid) -> AppResult<Option<CustomerMeter>> {
        self.check(meter_id)?;
        Ok(self.get(customer_id, meter_id))
    }

    async fn get_or_create(&self, customer_id: Uuid, meter_id: Uuid) -> AppResult<CustomerMeter> {
        self.check(meter_id)?;
        Ok(self
            .rows
            .lock()
            .entry((customer_id, meter_id))
            .or_insert_with(|| CustomerMeter::new(customer_id, meter_id))
            .clone())
    }

    async fn save(&self, customer_meter: &CustomerMeter) -> AppResult<CustomerMeter> {
        self.check(customer_meter.meter_id)?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().insert(
            (customer_meter.customer_id, customer_meter.meter_id),
            customer_meter.clone(),
        );
        Ok(customer_meter.clone())
    }

    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<CustomerMeter>> {
        let mut rows: Vec<CustomerMeter> = self
            .rows
            .lock()
            .values()
            .filter(|r| r.customer_id == customer_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

// ==================== Ledger ====================

/// Accounts and credits sharing one store, mutated atomically
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<Uuid, Account>>,
    credits: Mutex<Vec<AccountCredit>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: Account) -> Account {
        self.accounts.lock().insert(account.id, account.clone());
        account
    }

    /// Overwrite the cached balance without touching credits
    pub fn set_balance(&self, account_id: Uuid, balance: i64) {
        if let Some(account) = self.accounts.lock().get_mut(&account_id) {
            account.credit_balance = balance;
        }
    }

    pub fn balance(&self, account_id: Uuid) -> i64 {
        self.accounts
            .lock()
            .get(&account_id)
            .map(|a| a.credit_balance)
            .unwrap_or_default()
    }

    pub fn credit(&self, credit_id: Uuid) -> Option<AccountCredit> {
        self.credits.lock().iter().find(|c| c.id == credit_id).cloned()
    }

    pub fn total_used(&self, account_id: Uuid) -> i64 {
        self.credits
            .lock()
            .iter()
            .filter(|c| c.account_id == account_id)
            .map(|c| c.used)
            .sum()
    }
}

#[async_trait]
impl Repository<Account, Uuid> for InMemoryLedger {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.accounts.lock().get(&id).cloned())
    }
}

#[async_trait]
impl AccountRepository for InMemoryLedger {
    async fn credit_balance(&self, account_id: Uuid) -> AppResult<i64> {
        self.accounts
            .lock()
            .get(&account_id)
            .map(|a| a.credit_balance)
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }
}

#[async_trait]
impl Repository<AccountCredit, Uuid> for InMemoryLedger {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<AccountCredit>> {
        Ok(self.credit(id))
    }
}

#[async_trait]
impl AccountCreditRepository for InMemoryLedger {
    async fn list_by_account(&self, account_id: Uuid) -> AppResult<Vec<AccountCredit>> {
        let mut credits: Vec<AccountCredit> = self
            .credits
            .lock()
            .iter()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        credits.sort_by_key(|c| (c.granted_at, c.id));
        Ok(credits)
    }

    async fn list_active(&self, account_id: Uuid, now: DateTime<Utc>) -> AppResult<Vec<AccountCredit>> {
        let mut credits = self.list_by_account(account_id).await?;
        credits.retain(|c| c.is_active_at(now));
        Ok(credits)
    }

    async fn insert_grant(&self, credit: &AccountCredit) -> AppResult<i64> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&credit.account_id)
            .ok_or_else(|| AppError::AccountNotFound(credit.account_id.to_string()))?;

        // Keep grant order strictly increasing for FIFO assertions
        let mut credits = self.credits.lock();
        let mut credit = credit.clone();
        if let Some(last) = credits.iter().map(|c| c.granted_at).max() {
            if credit.granted_at <= last {
                credit.granted_at = last + Duration::milliseconds(1);
            }
        }
        credits.push(credit.clone());

        account.credit_balance = (account.credit_balance + credit.amount).max(0);
        Ok(account.credit_balance)
    }

    async fn revoke(
        &self,
        credit_id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> AppResult<Option<(AccountCredit, i64)>> {
        let mut accounts = self.accounts.lock();
        let mut credits = self.credits.lock();
        let credit = credits
            .iter_mut()
            .find(|c| c.id == credit_id)
            .ok_or_else(|| AppError::CreditNotFound(credit_id.to_string()))?;

        if credit.is_revoked() {
            return Ok(None);
        }
        credit.revoked_at = Some(revoked_at);

        let account = accounts
            .get_mut(&credit.account_id)
            .ok_or_else(|| AppError::AccountNotFound(credit.account_id.to_string()))?;
        account.credit_balance = account.reduced_balance(credit.amount);

        Ok(Some((credit.clone(), account.credit_balance)))
    }

    async fn record_usage(
        &self,
        account_id: Uuid,
        usages: &[CreditUsage],
        reset_balance: bool,
    ) -> AppResult<i64> {
        let mut accounts = self.accounts.lock();
        let mut credits = self.credits.lock();

        // Validate everything before mutating anything
        for usage in usages {
            let credit = credits
                .iter()
                .find(|c| c.id == usage.credit_id && c.account_id == account_id)
                .ok_or_else(|| AppError::CreditNotFound(usage.credit_id.to_string()))?;
            if credit.is_revoked() || credit.used + usage.amount > credit.amount {
                return Err(AppError::Conflict(format!(
                    "Credit {} cannot absorb {}",
                    usage.credit_id, usage.amount
                )));
            }
        }

        let mut total = 0;
        for usage in usages {
            if let Some(credit) = credits.iter_mut().find(|c| c.id == usage.credit_id) {
                credit.used += usage.amount;
                total += usage.amount;
            }
        }

        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
        if reset_balance {
            account.credit_balance = 0;
        }
        account.credit_balance = account.reduced_balance(total);
        Ok(account.credit_balance)
    }
}

// ==================== Notifier ====================

#[derive(Default)]
pub struct RecordingNotifier {
    pub state_changes: Mutex<Vec<Uuid>>,
    pub grants: Mutex<Vec<(Uuid, Uuid)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_change_count(&self) -> usize {
        self.state_changes.lock().len()
    }
}

#[async_trait]
impl StateNotifier for RecordingNotifier {
    async fn customer_state_changed(&self, customer: &Customer) {
        self.state_changes.lock().push(customer.id);
    }

    async fn credit_granted(&self, organization: &Organization, credit: &AccountCredit) {
        self.grants.lock().push((organization.id, credit.id));
    }
}

// ==================== Event builders ====================

pub fn usage_event(customer: &Customer, name: &str, metadata: Value) -> Event {
    Event {
        organization_id: customer.organization_id,
        customer_id: Some(customer.id),
        name: name.to_string(),
        source: EventSource::User,
        metadata,
        ..Default::default()
    }
}

pub fn external_usage_event(customer: &Customer, name: &str, metadata: Value) -> Event {
    Event {
        organization_id: customer.organization_id,
        customer_id: None,
        external_customer_id: customer.external_id.clone(),
        name: name.to_string(),
        source: EventSource::User,
        metadata,
        ..Default::default()
    }
}

pub fn credit_event(customer: &Customer, meter: &Meter, units: i64, rollover: bool) -> Event {
    Event {
        organization_id: customer.organization_id,
        customer_id: Some(customer.id),
        name: system_events::METER_CREDITED.to_string(),
        source: EventSource::System,
        is_meter_credit: true,
        metadata: json!({
            "meter_id": meter.id.to_string(),
            "units": units,
            "rollover": rollover,
        }),
        ..Default::default()
    }
}

pub fn reset_event(customer: &Customer, meter: &Meter) -> Event {
    Event {
        organization_id: customer.organization_id,
        customer_id: Some(customer.id),
        name: system_events::METER_RESET.to_string(),
        source: EventSource::System,
        metadata: json!({ "meter_id": meter.id.to_string() }),
        ..Default::default()
    }
}

pub fn organization() -> Organization {
    Organization {
        id: Uuid::new_v4(),
        name: "Acme".to_string(),
        slug: "acme".to_string(),
    }
}
