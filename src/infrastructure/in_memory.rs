use crate::domain::account::{Account, AccountId, Amount, Balance};
use crate::domain::payment::{CreditOutcome, PaymentIntent, PaymentRef, PaymentStatus};
use crate::domain::plan::PlanId;
use crate::domain::ports::LedgerStore;
use crate::domain::subscription::{
    NewSubscription, Reservation, ReservationOutcome, ReservationToken, Subscription,
    SubscriptionId, SubscriptionStatus,
};
use crate::error::{Result, ShopError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    payments: HashMap<PaymentRef, PaymentIntent>,
    reservations: HashMap<ReservationToken, Reservation>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    last_subscription_id: u64,
}

impl LedgerState {
    fn account_mut(&mut self, id: AccountId, now: DateTime<Utc>) -> &mut Account {
        self.accounts
            .entry(id)
            .or_insert_with(|| Account::new(id, now))
    }
}

/// A thread-safe in-memory ledger.
///
/// All records live behind one `Arc<RwLock<..>>`; every mutating operation holds the
/// write half for its whole duration, which makes each operation atomic.
/// Suited to tests and to running without persistence.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ensure_account(&self, account: AccountId, now: DateTime<Utc>) -> Result<Account> {
        let mut state = self.state.write().await;
        Ok(state.account_mut(account, now).clone())
    }

    async fn get_account(&self, account: AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&account).cloned())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    async fn open_payment_intent(&self, intent: PaymentIntent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&intent.payment_ref) {
            return Err(ShopError::InvalidInput(format!(
                "payment reference {} already exists",
                intent.payment_ref
            )));
        }
        state.account_mut(intent.account, intent.created_at);
        state.payments.insert(intent.payment_ref.clone(), intent);
        Ok(())
    }

    async fn get_payment_intent(&self, payment_ref: &PaymentRef) -> Result<Option<PaymentIntent>> {
        let state = self.state.read().await;
        Ok(state.payments.get(payment_ref).cloned())
    }

    async fn pending_payment_intents(&self) -> Result<Vec<PaymentIntent>> {
        let state = self.state.read().await;
        let mut pending: Vec<PaymentIntent> = state
            .payments
            .values()
            .filter(|intent| intent.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|intent| intent.created_at);
        Ok(pending)
    }

    async fn credit_if_pending(
        &self,
        payment_ref: &PaymentRef,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<CreditOutcome> {
        let mut state = self.state.write().await;
        let Some(intent) = state.payments.get_mut(payment_ref) else {
            return Ok(CreditOutcome::NotFound);
        };
        match intent.status {
            PaymentStatus::Settled => return Ok(CreditOutcome::AlreadyApplied),
            PaymentStatus::Failed => return Ok(CreditOutcome::Closed),
            PaymentStatus::Pending => {}
        }
        intent.status = PaymentStatus::Settled;
        intent.closed_at = Some(now);
        let owner = intent.account;
        state.account_mut(owner, now).credit(amount);
        Ok(CreditOutcome::Applied)
    }

    async fn fail_if_pending(&self, payment_ref: &PaymentRef, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(payment_ref) {
            Some(intent) if intent.is_pending() => {
                intent.status = PaymentStatus::Failed;
                intent.closed_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ShopError::NotFound(format!("payment {payment_ref}"))),
        }
    }

    async fn reserve_debit(
        &self,
        account: AccountId,
        amount: Amount,
        plan: PlanId,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome> {
        let mut state = self.state.write().await;
        let entry = state.account_mut(account, now);
        if entry.debit(amount).is_err() {
            return Ok(ReservationOutcome::InsufficientFunds {
                balance: entry.balance.value(),
            });
        }
        let reservation = Reservation {
            token: ReservationToken::generate(),
            account,
            amount,
            plan,
            created_at: now,
        };
        state
            .reservations
            .insert(reservation.token, reservation.clone());
        Ok(ReservationOutcome::Reserved(reservation))
    }

    async fn commit_reservation(
        &self,
        token: ReservationToken,
        subscription: NewSubscription,
    ) -> Result<Subscription> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .remove(&token)
            .ok_or_else(|| ShopError::NotFound(format!("reservation {token}")))?;
        state.last_subscription_id += 1;
        let record = Subscription {
            id: SubscriptionId(state.last_subscription_id),
            account: reservation.account,
            plan: reservation.plan,
            credential: subscription.credential,
            expires_at: subscription.expires_at,
            status: SubscriptionStatus::Active,
            created_at: subscription.created_at,
        };
        state.subscriptions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn release_reservation(&self, token: ReservationToken) -> Result<Balance> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .remove(&token)
            .ok_or_else(|| ShopError::NotFound(format!("reservation {token}")))?;
        let account = state.account_mut(reservation.account, reservation.created_at);
        account.credit(reservation.amount);
        Ok(account.balance)
    }

    async fn open_reservations(&self) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut open: Vec<Reservation> = state.reservations.values().cloned().collect();
        open.sort_by_key(|reservation| reservation.created_at);
        Ok(open)
    }

    async fn list_active_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|sub| sub.account == account && sub.is_active())
            .cloned()
            .collect())
    }

    async fn list_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|sub| sub.account == account)
            .cloned()
            .collect())
    }

    async fn expire_due_subscriptions(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write().await;
        Ok(state
            .subscriptions
            .values_mut()
            .map(|sub| sub.expire_if_due(now))
            .filter(|changed| *changed)
            .count())
    }

    async fn revoke_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| ShopError::NotFound(format!("subscription {id}")))?;
        Ok(subscription.revoke())
    }
}
