use super::account::{Account, AccountId, Amount, Balance};
use super::payment::{
    CreditOutcome, PaymentInstructions, PaymentIntent, PaymentRef, SettlementStatus,
};
use super::plan::PlanId;
use super::provisioning::{ClientSpec, Inbound, PanelClient, PanelError};
use super::subscription::{
    NewSubscription, Reservation, ReservationOutcome, ReservationToken, Subscription,
    SubscriptionId,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Durable storage for accounts, payment intents, reservations and subscriptions.
///
/// Every method is atomic. Implementations serialize mutations at least per account,
/// so a balance check and the matching balance change are never interleaved with
/// another request for the same account.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the account, creating it with a zero balance on first use.
    async fn ensure_account(&self, account: AccountId, now: DateTime<Utc>) -> Result<Account>;
    async fn get_account(&self, account: AccountId) -> Result<Option<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    /// Records a new pending intent. Fails with `InvalidInput` on a reused reference.
    async fn open_payment_intent(&self, intent: PaymentIntent) -> Result<()>;
    async fn get_payment_intent(&self, payment_ref: &PaymentRef) -> Result<Option<PaymentIntent>>;
    async fn pending_payment_intents(&self) -> Result<Vec<PaymentIntent>>;

    /// Settles a pending intent and credits its account in one step.
    async fn credit_if_pending(
        &self,
        payment_ref: &PaymentRef,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<CreditOutcome>;

    /// Marks a pending intent as failed. Returns `false` if it was not pending.
    async fn fail_if_pending(&self, payment_ref: &PaymentRef, now: DateTime<Utc>)
    -> Result<bool>;

    /// Debits `amount` and holds it under a new reservation, if the balance covers it.
    async fn reserve_debit(
        &self,
        account: AccountId,
        amount: Amount,
        plan: PlanId,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome>;

    /// Turns a reservation into a subscription. Fails with `NotFound` if the token was
    /// already consumed.
    async fn commit_reservation(
        &self,
        token: ReservationToken,
        subscription: NewSubscription,
    ) -> Result<Subscription>;

    /// Returns the reserved amount to the account. Fails with `NotFound` if the token was
    /// already consumed.
    async fn release_reservation(&self, token: ReservationToken) -> Result<Balance>;

    async fn open_reservations(&self) -> Result<Vec<Reservation>>;

    async fn list_active_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>>;
    async fn list_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>>;

    /// Expires every active subscription whose expiry is at or before `now`.
    async fn expire_due_subscriptions(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn revoke_subscription(&self, id: SubscriptionId) -> Result<bool>;
}

/// The external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Creates a payment request labelled with `payment_ref`.
    async fn create_payment_request(
        &self,
        payment_ref: &PaymentRef,
        amount: Amount,
    ) -> Result<PaymentInstructions>;

    /// Looks up the processor's history for `payment_ref`. Read-only.
    async fn settlement_status(&self, payment_ref: &PaymentRef) -> Result<SettlementStatus>;
}

/// The remote access-gateway panel.
#[async_trait]
pub trait AccessPanel: Send + Sync {
    async fn login(&self) -> std::result::Result<(), PanelError>;
    async fn list_inbounds(&self) -> std::result::Result<Vec<Inbound>, PanelError>;
    async fn find_client(&self, label: &str) -> std::result::Result<Option<PanelClient>, PanelError>;
    async fn add_client(&self, inbound_id: u32, client: &ClientSpec)
    -> std::result::Result<(), PanelError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type AccessPanelRef = Arc<dyn AccessPanel>;
pub type ClockRef = Arc<dyn Clock>;
