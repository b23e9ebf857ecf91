use super::payments::PaymentGatewayClient;
use super::provisioning::ProvisioningClient;
use super::retry::RetryPolicy;
use crate::domain::account::{AccountId, Balance};
use crate::domain::payment::{
    CreditOutcome, OpenedIntent, PaymentIntent, PaymentRef, PaymentStatus, SettlementStatus,
};
use crate::domain::plan::{Catalog, Plan, PlanId};
use crate::domain::ports::{AccessPanelRef, ClockRef, LedgerStoreRef, PaymentProcessorRef};
use crate::domain::provisioning::{PanelClient, PanelError, ProvisionOutcome};
use crate::domain::subscription::{
    NewSubscription, Reservation, ReservationOutcome, Subscription, SubscriptionId,
};
use crate::error::{Result, ShopError};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables of the reconciliation flows.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a deposit may stay pending before it is failed.
    pub deposit_horizon: chrono::Duration,
    pub provisioning_retry: RetryPolicy,
    /// Upper bound on a single panel call.
    pub panel_call_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deposit_horizon: chrono::Duration::hours(24),
            provisioning_retry: RetryPolicy::default(),
            panel_call_timeout: Duration::from_secs(15),
        }
    }
}

/// What happened to one deposit during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    Credited,
    AlreadyCredited,
    Pending,
    Failed,
    /// Another pass is reconciling this intent right now.
    Busy,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DepositSweepReport {
    /// Intents credited during this sweep, for user notification.
    pub credited: Vec<PaymentIntent>,
    /// Intents that failed or passed the horizon during this sweep.
    pub failed: Vec<PaymentIntent>,
    pub pending: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub committed: usize,
    pub refunded: usize,
    pub unresolved: usize,
}

/// Payment refs currently being reconciled.
#[derive(Default)]
struct InFlight {
    refs: Mutex<HashSet<PaymentRef>>,
}

struct Claim<'a> {
    owner: &'a InFlight,
    payment_ref: PaymentRef,
}

impl InFlight {
    fn claim(&self, payment_ref: &PaymentRef) -> Option<Claim<'_>> {
        let mut refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        refs.insert(payment_ref.clone()).then(|| Claim {
            owner: self,
            payment_ref: payment_ref.clone(),
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut refs = self.owner.refs.lock().unwrap_or_else(PoisonError::into_inner);
        refs.remove(&self.payment_ref);
    }
}

/// Drives deposits into balance credits and purchases into provisioned subscriptions.
///
/// Ledger mutations go through the store's atomic operations; no store lock is held
/// while the processor or the panel is being called. Every purchase that takes a
/// reservation ends with exactly one of commit or release.
pub struct ReconciliationEngine {
    ledger: LedgerStoreRef,
    payments: PaymentGatewayClient,
    provisioning: ProvisioningClient,
    catalog: Catalog,
    clock: ClockRef,
    settings: EngineSettings,
    in_flight: InFlight,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: LedgerStoreRef,
        processor: PaymentProcessorRef,
        panel: AccessPanelRef,
        clock: ClockRef,
        catalog: Catalog,
        settings: EngineSettings,
    ) -> Self {
        Self {
            payments: PaymentGatewayClient::new(processor, ledger.clone(), clock.clone()),
            provisioning: ProvisioningClient::new(panel, settings.panel_call_timeout),
            ledger,
            catalog,
            clock,
            settings,
            in_flight: InFlight::default(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Opens a deposit for `account` and returns the payment instructions.
    pub async fn request_deposit(&self, account: AccountId, amount: Decimal) -> Result<OpenedIntent> {
        self.ledger.ensure_account(account, self.clock.now()).await?;
        self.payments.open_intent(account, amount).await
    }

    /// Checks one deposit on demand ("I have paid").
    ///
    /// A processor that cannot be reached yields `GatewayUnavailable`; the deposit stays
    /// pending and can be checked again.
    pub async fn confirm_deposit(&self, payment_ref: &PaymentRef) -> Result<DepositOutcome> {
        let intent = self
            .ledger
            .get_payment_intent(payment_ref)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("payment {payment_ref}")))?;
        match intent.status {
            PaymentStatus::Failed => return Ok(DepositOutcome::Failed),
            PaymentStatus::Settled => return Ok(DepositOutcome::AlreadyCredited),
            PaymentStatus::Pending => {}
        }
        let Some(_claim) = self.in_flight.claim(payment_ref) else {
            return Ok(DepositOutcome::Busy);
        };
        self.reconcile_intent(&intent).await
    }

    async fn reconcile_intent(&self, intent: &PaymentIntent) -> Result<DepositOutcome> {
        let payment_ref = &intent.payment_ref;
        // Only an answer from the processor may move the intent, never a failed poll.
        let status = self
            .payments
            .poll_settlement(payment_ref)
            .await
            .inspect_err(|err| {
                warn!(%payment_ref, error = %err, "Settlement poll failed, keeping intent pending");
            })?;
        let now = self.clock.now();

        match status {
            SettlementStatus::Settled => {
                match self
                    .ledger
                    .credit_if_pending(payment_ref, intent.amount, now)
                    .await?
                {
                    CreditOutcome::Applied => {
                        info!(%payment_ref, account = %intent.account, amount = %intent.amount, "Deposit credited");
                        Ok(DepositOutcome::Credited)
                    }
                    CreditOutcome::AlreadyApplied => Ok(DepositOutcome::AlreadyCredited),
                    CreditOutcome::Closed => {
                        warn!(%payment_ref, account = %intent.account, "Processor settled a deposit that was already failed");
                        Ok(DepositOutcome::Failed)
                    }
                    CreditOutcome::NotFound => {
                        Err(ShopError::NotFound(format!("payment {payment_ref}")))
                    }
                }
            }
            SettlementStatus::Failed => {
                self.ledger.fail_if_pending(payment_ref, now).await?;
                info!(%payment_ref, account = %intent.account, "Deposit failed at the processor");
                Ok(DepositOutcome::Failed)
            }
            SettlementStatus::Pending
                if intent.is_pending()
                    && intent.is_past_horizon(now, self.settings.deposit_horizon) =>
            {
                self.ledger.fail_if_pending(payment_ref, now).await?;
                info!(%payment_ref, account = %intent.account, "Deposit expired unpaid");
                Ok(DepositOutcome::Failed)
            }
            SettlementStatus::Pending => Ok(DepositOutcome::Pending),
        }
    }

    /// One pass over every pending deposit.
    pub async fn run_deposit_sweep(&self) -> Result<DepositSweepReport> {
        let mut report = DepositSweepReport::default();
        for intent in self.ledger.pending_payment_intents().await? {
            let Some(_claim) = self.in_flight.claim(&intent.payment_ref) else {
                report.skipped += 1;
                continue;
            };
            match self.reconcile_intent(&intent).await {
                Ok(DepositOutcome::Credited) => report.credited.push(intent),
                Ok(DepositOutcome::Failed) => report.failed.push(intent),
                Ok(DepositOutcome::Pending) => report.pending += 1,
                Ok(DepositOutcome::AlreadyCredited | DepositOutcome::Busy) => {}
                Err(err) => {
                    error!(payment_ref = %intent.payment_ref, error = %err, "Deposit reconciliation failed");
                    report.errors += 1;
                }
            }
        }
        debug!(
            credited = report.credited.len(),
            failed = report.failed.len(),
            pending = report.pending,
            "Deposit sweep finished"
        );
        Ok(report)
    }

    /// Buys `plan` for `account`: reserve, provision, then commit or refund.
    pub async fn request_purchase(&self, account: AccountId, plan: &PlanId) -> Result<Subscription> {
        let plan = self
            .catalog
            .get(plan)
            .cloned()
            .ok_or_else(|| ShopError::InvalidInput(format!("unknown plan {plan}")))?;

        let reservation = match self
            .ledger
            .reserve_debit(account, plan.price, plan.id.clone(), self.clock.now())
            .await?
        {
            ReservationOutcome::Reserved(reservation) => reservation,
            ReservationOutcome::InsufficientFunds { balance } => {
                info!(%account, plan = %plan.id, %balance, "Purchase rejected, insufficient funds");
                return Err(ShopError::InsufficientFunds {
                    balance,
                    required: plan.price.value(),
                });
            }
        };
        debug!(%account, token = %reservation.token, "Debit reserved");

        self.complete_reservation(&reservation, &plan).await
    }

    async fn provision_with_retry(
        &self,
        reservation: &Reservation,
        plan: &Plan,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> (ProvisionOutcome, u32) {
        let policy = &self.settings.provisioning_retry;
        let epoch = reservation.token.epoch();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .provisioning
                .provision(reservation.account, plan, &epoch, expires_at)
                .await
            {
                ProvisionOutcome::TransientFailure(reason) if attempt < policy.attempts() => {
                    let delay = policy.delay_after(attempt);
                    warn!(token = %reservation.token, attempt, ?delay, %reason, "Retrying provisioning");
                    tokio::time::sleep(delay).await;
                }
                outcome => return (outcome, attempt),
            }
        }
    }

    async fn complete_reservation(&self, reservation: &Reservation, plan: &Plan) -> Result<Subscription> {
        let requested_expiry = self.clock.now() + plan.duration();
        let (outcome, attempts) = self
            .provision_with_retry(reservation, plan, requested_expiry)
            .await;

        match outcome {
            ProvisionOutcome::Provisioned {
                credential,
                expires_at,
            } => {
                let subscription = self
                    .ledger
                    .commit_reservation(
                        reservation.token,
                        NewSubscription {
                            credential,
                            expires_at,
                            created_at: self.clock.now(),
                        },
                    )
                    .await
                    .inspect_err(|err| {
                        error!(token = %reservation.token, error = %err, "Commit failed, reservation left open for recovery");
                    })?;
                info!(
                    account = %subscription.account,
                    subscription = %subscription.id,
                    plan = %subscription.plan,
                    expires_at = %subscription.expires_at,
                    "Purchase committed"
                );
                Ok(subscription)
            }
            ProvisionOutcome::TransientFailure(reason) => {
                self.refund(reservation, &reason).await?;
                Err(ShopError::TransientFailure(format!(
                    "provisioning unavailable after {attempts} attempts"
                )))
            }
            ProvisionOutcome::PermanentFailure(reason) => {
                self.refund(reservation, &reason).await?;
                Err(ShopError::PermanentFailure(format!(
                    "plan {} could not be provisioned",
                    plan.id
                )))
            }
        }
    }

    async fn refund(&self, reservation: &Reservation, reason: &str) -> Result<()> {
        let balance = self.ledger.release_reservation(reservation.token).await?;
        info!(
            account = %reservation.account,
            token = %reservation.token,
            %reason,
            %balance,
            "Reservation released"
        );
        Ok(())
    }

    /// Finishes reservations left open by an interrupted process.
    ///
    /// Each one is provisioned again with its original epoch, so an identity created
    /// before the interruption is reused, then committed or refunded. Run before the
    /// engine starts serving purchases.
    pub async fn recover_reservations(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for reservation in self.ledger.open_reservations().await? {
            let Some(plan) = self.catalog.get(&reservation.plan).cloned() else {
                self.refund(&reservation, "plan no longer offered").await?;
                report.refunded += 1;
                continue;
            };
            match self.complete_reservation(&reservation, &plan).await {
                Ok(_) => report.committed += 1,
                Err(ShopError::TransientFailure(_) | ShopError::PermanentFailure(_)) => {
                    report.refunded += 1
                }
                Err(err) => {
                    error!(token = %reservation.token, error = %err, "Reservation recovery failed");
                    report.unresolved += 1;
                }
            }
        }
        if report != RecoveryReport::default() {
            info!(?report, "Open reservations recovered");
        }
        Ok(report)
    }

    pub async fn get_balance(&self, account: AccountId) -> Result<Balance> {
        Ok(self
            .ledger
            .ensure_account(account, self.clock.now())
            .await?
            .balance)
    }

    /// Active subscriptions of `account`.
    pub async fn list_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        self.ledger.list_active_subscriptions(account).await
    }

    /// The panel's live view of one of the account's credentials.
    pub async fn credential_status(
        &self,
        account: AccountId,
        subscription: SubscriptionId,
    ) -> Result<Option<PanelClient>> {
        let record = self
            .ledger
            .list_subscriptions(account)
            .await?
            .into_iter()
            .find(|sub| sub.id == subscription)
            .ok_or_else(|| ShopError::NotFound(format!("subscription {subscription}")))?;

        self.provisioning
            .lookup(&record.credential)
            .await
            .map_err(|err| match err {
                PanelError::Rejected(msg) => ShopError::PermanentFailure(msg),
                other => ShopError::TransientFailure(other.to_string()),
            })
    }

    /// Administrative revoke. Returns `false` if the subscription was not active.
    pub async fn revoke_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let revoked = self.ledger.revoke_subscription(id).await?;
        if revoked {
            info!(subscription = %id, "Subscription revoked");
        }
        Ok(revoked)
    }

    pub async fn run_expiry_sweep(&self) -> Result<usize> {
        let expired = self
            .ledger
            .expire_due_subscriptions(self.clock.now())
            .await?;
        if expired > 0 {
            info!(expired, "Subscriptions expired");
        }
        Ok(expired)
    }
}
