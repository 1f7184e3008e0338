//! Account credit ledger
//!
//! Manages prepaid credit throughout its lifecycle:
//! - Grant credits, directly or from a signup campaign
//! - Revoke credits (terminal)
//! - Apply credits to fees, oldest grant first
//! - Keep the account's cached `credit_balance` in step with the ledger
//!
//! Every mutation runs under the `account_credit:{account_id}` lock, so two
//! fee applications on one account never plan against the same `used`
//! figures.

use chrono::Utc;
use polar_cache::keys;
use polar_core::{
    config::LockTimings,
    models::{
        campaign::SIGNUP_BONUS_TITLE, Account, AccountCredit, Campaign, CreditGrant, Organization,
    },
    traits::{AccountCreditRepository, AccountRepository, CreditUsage, Locker, StateNotifier},
    AppError, AppResult,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::constants::ACCOUNT_CREDIT_LOCK;
use crate::lock::with_lock;

/// Result of applying credits to a fee
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct FeeApplication {
    /// Amount covered by credits; at most the fee
    pub applied: i64,

    /// Credits drawn from, in consumption order, with their updated `used`
    pub credits_used: Vec<AccountCredit>,

    /// Cached balance after the application
    pub credit_balance: i64,
}

/// Split `fee` over `credits` in the order given, taking from each what it
/// has left until the fee is covered.
pub fn plan_fee_application(credits: &[AccountCredit], fee: i64) -> Vec<CreditUsage> {
    let mut outstanding = fee;
    let mut usages = Vec::new();

    for credit in credits {
        if outstanding <= 0 {
            break;
        }
        let take = credit.remaining().min(outstanding);
        if take <= 0 {
            continue;
        }
        usages.push(CreditUsage {
            credit_id: credit.id,
            amount: take,
        });
        outstanding -= take;
    }

    usages
}

/// Account credit service
pub struct AccountCreditService {
    accounts: Arc<dyn AccountRepository>,
    credits: Arc<dyn AccountCreditRepository>,
    locker: Arc<dyn Locker>,
    notifier: Arc<dyn StateNotifier>,
    lock_timings: LockTimings,
}

impl AccountCreditService {
    /// Create a new account credit service
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        credits: Arc<dyn AccountCreditRepository>,
        locker: Arc<dyn Locker>,
        notifier: Arc<dyn StateNotifier>,
    ) -> Self {
        Self {
            accounts,
            credits,
            locker,
            notifier,
            lock_timings: ACCOUNT_CREDIT_LOCK,
        }
    }

    /// Override the account credit lock timings
    pub fn with_lock_timings(mut self, lock_timings: LockTimings) -> Self {
        self.lock_timings = lock_timings;
        self
    }

    async fn locked<T, F, Fut>(&self, account_id: Uuid, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let key = keys::account_credit_lock_key(account_id);
        with_lock(self.locker.as_ref(), &key, self.lock_timings, f).await
    }

    /// Grant a credit and add its amount to the account balance.
    ///
    /// When `organization` is given it is notified of the grant. Callers are
    /// expected to pass a positive amount; only the ledger can fail this.
    #[instrument(skip(self, account, grant, organization), fields(account_id = %account.id, amount = grant.amount))]
    pub async fn grant(
        &self,
        account: &Account,
        grant: CreditGrant,
        organization: Option<&Organization>,
    ) -> AppResult<AccountCredit> {
        let credit = AccountCredit::from_grant(account.id, grant);
        let balance = self
            .locked(account.id, || self.credits.insert_grant(&credit))
            .await?;

        info!(
            "Granted {} to account {} ({}), balance {}",
            credit.amount, account.id, credit.title, balance
        );

        if let Some(organization) = organization {
            self.notifier.credit_granted(organization, &credit).await;
        }

        Ok(credit)
    }

    /// Grant a campaign's signup bonus.
    ///
    /// Returns `None` when the campaign carries no credit. The credit
    /// expires when the campaign ends.
    #[instrument(skip(self, account, campaign), fields(account_id = %account.id, campaign = %campaign.code))]
    pub async fn grant_from_campaign(
        &self,
        account: &Account,
        campaign: &Campaign,
    ) -> AppResult<Option<AccountCredit>> {
        let Some(amount) = campaign.grantable_amount() else {
            debug!("Campaign {} has no credit to grant", campaign.code);
            return Ok(None);
        };

        let grant = CreditGrant::new(amount, SIGNUP_BONUS_TITLE)
            .expires_at(campaign.ends_at)
            .campaign(campaign.id)
            .notes(format!("Granted from campaign {}", campaign.code))
            .metadata(json!({
                "campaign_id": campaign.id,
                "campaign_code": campaign.code,
            }));

        self.grant(account, grant, None).await.map(Some)
    }

    /// Revoke a credit, removing its full amount from the balance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CreditAlreadyRevoked` when the credit was already
    /// revoked; the balance is left untouched.
    #[instrument(skip(self, credit, account), fields(credit_id = %credit.id, account_id = %account.id))]
    pub async fn revoke(&self, credit: &AccountCredit, account: &Account) -> AppResult<AccountCredit> {
        if credit.account_id != account.id {
            return Err(AppError::Validation(format!(
                "Credit {} does not belong to account {}",
                credit.id, account.id
            )));
        }
        if credit.is_revoked() {
            warn!("Credit {} already revoked", credit.id);
            return Err(AppError::CreditAlreadyRevoked(credit.id));
        }

        let revoked = self
            .locked(account.id, || self.credits.revoke(credit.id, Utc::now()))
            .await?;

        match revoked {
            Some((credit, balance)) => {
                info!("Revoked credit {} ({}), balance {}", credit.id, credit.amount, balance);
                Ok(credit)
            }
            None => {
                warn!("Credit {} revoked concurrently", credit.id);
                Err(AppError::CreditAlreadyRevoked(credit.id))
            }
        }
    }

    /// Cover as much of `fee` as active credits allow, oldest grant first.
    ///
    /// Never fails for lack of credit: `applied` may be less than the fee.
    /// An account whose cached balance claims credit but has no active
    /// credits left has its balance reset to zero.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn apply_to_fee(&self, account: &Account, fee: i64) -> AppResult<FeeApplication> {
        self.apply(account.id, fee, false).await
    }

    /// Like `apply_to_fee`, but all or nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InsufficientCredits` without touching the ledger
    /// when active credits cannot cover the whole fee.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn apply_to_fee_strict(&self, account: &Account, fee: i64) -> AppResult<FeeApplication> {
        self.apply(account.id, fee, true).await
    }

    async fn apply(&self, account_id: Uuid, fee: i64, strict: bool) -> AppResult<FeeApplication> {
        if fee <= 0 {
            return Ok(FeeApplication::default());
        }

        self.locked(account_id, || self.apply_locked(account_id, fee, strict))
            .await
    }

    async fn apply_locked(&self, account_id: Uuid, fee: i64, strict: bool) -> AppResult<FeeApplication> {
        let balance = self.accounts.credit_balance(account_id).await?;
        if balance <= 0 && !strict {
            debug!("No credit balance");
            return Ok(FeeApplication {
                credit_balance: balance,
                ..Default::default()
            });
        }

        let active = self.credits.list_active(account_id, Utc::now()).await?;

        if strict {
            let available: i64 = active.iter().map(AccountCredit::remaining).sum();
            if available < fee {
                warn!("Insufficient credits: required {}, available {}", fee, available);
                return Err(AppError::InsufficientCredits {
                    required: fee,
                    available,
                });
            }
        }

        if active.is_empty() {
            warn!("Balance {} not backed by active credits, resetting", balance);
            let balance = self.credits.record_usage(account_id, &[], true).await?;
            return Ok(FeeApplication {
                credit_balance: balance,
                ..Default::default()
            });
        }

        let usages = plan_fee_application(&active, fee);
        let applied: i64 = usages.iter().map(|u| u.amount).sum();
        let balance = self.credits.record_usage(account_id, &usages, false).await?;

        let credits_used = usages
            .iter()
            .filter_map(|usage| {
                active.iter().find(|c| c.id == usage.credit_id).map(|c| {
                    let mut credit = c.clone();
                    credit.used += usage.amount;
                    credit
                })
            })
            .collect();

        info!("Applied {} of fee {}, balance {}", applied, fee, balance);
        Ok(FeeApplication {
            applied,
            credits_used,
            credit_balance: balance,
        })
    }

    /// Credits that can still be consumed, oldest grant first
    pub async fn active_credits(&self, account: &Account) -> AppResult<Vec<AccountCredit>> {
        self.credits.list_active(account.id, Utc::now()).await
    }

    /// Every credit of the account, including spent and revoked ones
    pub async fn list_credits(&self, account: &Account) -> AppResult<Vec<AccountCredit>> {
        self.credits.list_by_account(account.id).await
    }
}
