//! Polar metering worker
//!
//! Command-line entry point to the reconciliation engine and credit ledger.
//!
//! # Usage
//!
//! ```bash
//! polar-metering reconcile <customer_id>...
//! polar-metering apply-fee <account_id> <fee>
//! polar-metering credits <account_id>
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use polar_cache::{RedisCache, RedisLocker, RedisNotifier};
use polar_core::{config::LoggingConfig, traits::Repository, AppConfig};
use polar_db::{
    create_pool, run_migrations, PgAccountCreditRepository, PgAccountRepository,
    PgCustomerMeterRepository, PgCustomerRepository, PgEventRepository, PgMeterRepository,
};
use polar_services::{AccountCreditService, CustomerMeterService};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "polar-metering")]
#[command(version)]
#[command(about = "Polar usage metering and credit ledger", long_about = None)]
struct Cli {
    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Reconcile every meter of the given customers
    Reconcile {
        #[arg(required = true)]
        customer_ids: Vec<Uuid>,
    },
    /// Apply credits to a fee
    ApplyFee { account_id: Uuid, fee: i64 },
    /// List an account's credits
    Credits { account_id: Uuid },
}

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig, level: Option<&str>) {
    let log_level = level.unwrap_or(&logging.level);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "polar_metering={},polar_services={},polar_db={},polar_cache={},sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

struct Services {
    meters: CustomerMeterService,
    credits: AccountCreditService,
    accounts: Arc<PgAccountRepository>,
}

async fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let pool = create_pool(&config.database)
        .await
        .context("failed to connect to database")?;

    if config.database.run_migrations {
        run_migrations(&pool).await.context("failed to run migrations")?;
    }

    let cache = RedisCache::new(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    let locker = Arc::new(RedisLocker::new(cache.clone()));
    let notifier = Arc::new(RedisNotifier::new(cache, config.redis.channel_prefix.clone()));

    let accounts = Arc::new(PgAccountRepository::new(pool.clone()));

    let meters = CustomerMeterService::new(
        Arc::new(PgEventRepository::new(pool.clone())),
        Arc::new(PgMeterRepository::new(pool.clone())),
        Arc::new(PgCustomerRepository::new(pool.clone())),
        Arc::new(PgCustomerMeterRepository::new(pool.clone())),
        locker.clone(),
        notifier.clone(),
    )
    .with_lock_timings(config.locks.customer_meter());

    let credits = AccountCreditService::new(
        accounts.clone(),
        Arc::new(PgAccountCreditRepository::new(pool)),
        locker,
        notifier,
    )
    .with_lock_timings(config.locks.account_credit());

    Ok(Services {
        meters,
        credits,
        accounts,
    })
}

async fn reconcile(services: &Services, ids: &[Uuid]) -> anyhow::Result<()> {
    let mut failures = 0;
    for &customer_id in ids {
        match services.meters.reconcile_customer_by_id(customer_id).await {
            Ok(summary) => info!(
                "Customer {}: {} meters reconciled, {} changed, {} failed",
                customer_id, summary.reconciled, summary.changed, summary.failed
            ),
            Err(e) => {
                failures += 1;
                error!("Customer {} not reconciled: {}", customer_id, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} customers failed", failures, ids.len());
    }
    Ok(())
}

async fn apply_fee(services: &Services, account_id: Uuid, fee: i64) -> anyhow::Result<()> {
    let account = services
        .accounts
        .find_by_id(account_id)
        .await?
        .with_context(|| format!("account {} not found", account_id))?;

    let result = services.credits.apply_to_fee(&account, fee).await?;
    if result.applied < fee {
        warn!("Credits covered {} of fee {}", result.applied, fee);
    }
    info!(
        "Applied {} from {} credits, balance {}",
        result.applied,
        result.credits_used.len(),
        result.credit_balance
    );
    Ok(())
}

async fn list_credits(services: &Services, account_id: Uuid) -> anyhow::Result<()> {
    let account = services
        .accounts
        .find_by_id(account_id)
        .await?
        .with_context(|| format!("account {} not found", account_id))?;

    for credit in services.credits.list_credits(&account).await? {
        info!(
            credit_id = %credit.id,
            title = %credit.title,
            amount = credit.amount,
            used = credit.used,
            revoked = credit.is_revoked(),
            active = credit.is_active(),
            "credit"
        );
    }
    info!("Account {} balance {}", account.id, account.credit_balance);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.logging, cli.log_level.as_deref());

    info!("Starting Polar metering v{}", env!("CARGO_PKG_VERSION"));

    let services = build_services(&config).await?;

    match cli.command {
        Command::Reconcile { customer_ids } => reconcile(&services, &customer_ids).await,
        Command::ApplyFee { account_id, fee } => apply_fee(&services, account_id, fee).await,
        Command::Credits { account_id } => list_credits(&services, account_id).await,
    }
}
