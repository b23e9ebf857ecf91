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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing account states.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for storing payment intents, keyed by payment reference.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for storing open reservations, keyed by token.
pub const CF_RESERVATIONS: &str = "reservations";
/// Column Family for storing subscriptions, keyed by id.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const LAST_SUBSCRIPTION_ID: &[u8] = b"last_subscription_id";

/// A persistent ledger implementation using RocksDB.
///
/// Each record type lives in its own Column Family. Every operation that touches more
/// than one record is written as a single `WriteBatch`, so a crash never leaves a
/// settled intent without its credit, or a consumed reservation without its
/// subscription or refund. Mutations are serialized through `write_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

fn missing_cf(name: &str) -> ShopError {
    ShopError::InternalError(Box::new(std::io::Error::other(format!(
        "{name} column family not found"
    ))))
}

fn account_key(id: AccountId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn subscription_key(id: SubscriptionId) -> [u8; 8] {
    id.0.to_be_bytes()
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all ledger column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_ACCOUNTS,
            CF_PAYMENTS,
            CF_RESERVATIONS,
            CF_SUBSCRIPTIONS,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| missing_cf(name))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn load_account(&self, id: AccountId, now: DateTime<Utc>) -> Result<Account> {
        Ok(self
            .get_json(CF_ACCOUNTS, &account_key(id))?
            .unwrap_or_else(|| Account::new(id, now)))
    }

    fn take_reservation(&self, token: ReservationToken) -> Result<Reservation> {
        self.get_json(CF_RESERVATIONS, token.as_uuid().as_bytes())?
            .ok_or_else(|| ShopError::NotFound(format!("reservation {token}")))
    }

    fn last_subscription_id(&self) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_META)?, LAST_SUBSCRIPTION_ID)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ShopError::InternalError(Box::new(std::io::Error::other(
                        "corrupt subscription counter",
                    )))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn ensure_account(&self, account: AccountId, now: DateTime<Utc>) -> Result<Account> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.get_json(CF_ACCOUNTS, &account_key(account))? {
            return Ok(existing);
        }
        let created = Account::new(account, now);
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ACCOUNTS, &account_key(account), &created)?;
        self.db.write(batch)?;
        Ok(created)
    }

    async fn get_account(&self, account: AccountId) -> Result<Option<Account>> {
        self.get_json(CF_ACCOUNTS, &account_key(account))
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.scan(CF_ACCOUNTS)?;
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    async fn open_payment_intent(&self, intent: PaymentIntent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = intent.payment_ref.as_str().as_bytes();
        if self.get_json::<PaymentIntent>(CF_PAYMENTS, key)?.is_some() {
            return Err(ShopError::InvalidInput(format!(
                "payment reference {} already exists",
                intent.payment_ref
            )));
        }
        let account = self.load_account(intent.account, intent.created_at)?;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ACCOUNTS, &account_key(account.id), &account)?;
        self.put_json(&mut batch, CF_PAYMENTS, key, &intent)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_payment_intent(&self, payment_ref: &PaymentRef) -> Result<Option<PaymentIntent>> {
        self.get_json(CF_PAYMENTS, payment_ref.as_str().as_bytes())
    }

    async fn pending_payment_intents(&self) -> Result<Vec<PaymentIntent>> {
        let mut pending: Vec<PaymentIntent> = self
            .scan::<PaymentIntent>(CF_PAYMENTS)?
            .into_iter()
            .filter(|intent| intent.is_pending())
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
        let _guard = self.write_lock.lock().await;
        let key = payment_ref.as_str().as_bytes();
        let Some(mut intent) = self.get_json::<PaymentIntent>(CF_PAYMENTS, key)? else {
            return Ok(CreditOutcome::NotFound);
        };
        match intent.status {
            PaymentStatus::Settled => return Ok(CreditOutcome::AlreadyApplied),
            PaymentStatus::Failed => return Ok(CreditOutcome::Closed),
            PaymentStatus::Pending => {}
        }
        intent.status = PaymentStatus::Settled;
        intent.closed_at = Some(now);
        let mut account = self.load_account(intent.account, now)?;
        account.credit(amount);

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_PAYMENTS, key, &intent)?;
        self.put_json(&mut batch, CF_ACCOUNTS, &account_key(account.id), &account)?;
        self.db.write(batch)?;
        Ok(CreditOutcome::Applied)
    }

    async fn fail_if_pending(&self, payment_ref: &PaymentRef, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = payment_ref.as_str().as_bytes();
        let mut intent: PaymentIntent = self
            .get_json(CF_PAYMENTS, key)?
            .ok_or_else(|| ShopError::NotFound(format!("payment {payment_ref}")))?;
        if !intent.is_pending() {
            return Ok(false);
        }
        intent.status = PaymentStatus::Failed;
        intent.closed_at = Some(now);
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_PAYMENTS, key, &intent)?;
        self.db.write(batch)?;
        Ok(true)
    }

    async fn reserve_debit(
        &self,
        account: AccountId,
        amount: Amount,
        plan: PlanId,
        now: DateTime<Utc>,
    ) -> Result<ReservationOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_account(account, now)?;
        if record.debit(amount).is_err() {
            return Ok(ReservationOutcome::InsufficientFunds {
                balance: record.balance.value(),
            });
        }
        let reservation = Reservation {
            token: ReservationToken::generate(),
            account,
            amount,
            plan,
            created_at: now,
        };
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ACCOUNTS, &account_key(account), &record)?;
        self.put_json(
            &mut batch,
            CF_RESERVATIONS,
            reservation.token.as_uuid().as_bytes(),
            &reservation,
        )?;
        self.db.write(batch)?;
        Ok(ReservationOutcome::Reserved(reservation))
    }

    async fn commit_reservation(
        &self,
        token: ReservationToken,
        subscription: NewSubscription,
    ) -> Result<Subscription> {
        let _guard = self.write_lock.lock().await;
        let reservation = self.take_reservation(token)?;
        let id = SubscriptionId(self.last_subscription_id()? + 1);
        let record = Subscription {
            id,
            account: reservation.account,
            plan: reservation.plan,
            credential: subscription.credential,
            expires_at: subscription.expires_at,
            status: SubscriptionStatus::Active,
            created_at: subscription.created_at,
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_RESERVATIONS)?, token.as_uuid().as_bytes());
        batch.put_cf(self.cf(CF_META)?, LAST_SUBSCRIPTION_ID, id.0.to_be_bytes());
        self.put_json(&mut batch, CF_SUBSCRIPTIONS, &subscription_key(id), &record)?;
        self.db.write(batch)?;
        Ok(record)
    }

    async fn release_reservation(&self, token: ReservationToken) -> Result<Balance> {
        let _guard = self.write_lock.lock().await;
        let reservation = self.take_reservation(token)?;
        let mut account = self.load_account(reservation.account, reservation.created_at)?;
        account.credit(reservation.amount);

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_RESERVATIONS)?, token.as_uuid().as_bytes());
        self.put_json(&mut batch, CF_ACCOUNTS, &account_key(account.id), &account)?;
        self.db.write(batch)?;
        Ok(account.balance)
    }

    async fn open_reservations(&self) -> Result<Vec<Reservation>> {
        let mut open: Vec<Reservation> = self.scan(CF_RESERVATIONS)?;
        open.sort_by_key(|reservation| reservation.created_at);
        Ok(open)
    }

    async fn list_active_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        Ok(self
            .list_subscriptions(account)
            .await?
            .into_iter()
            .filter(Subscription::is_active)
            .collect())
    }

    async fn list_subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        Ok(self
            .scan::<Subscription>(CF_SUBSCRIPTIONS)?
            .into_iter()
            .filter(|sub| sub.account == account)
            .collect())
    }

    async fn expire_due_subscriptions(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let mut expired = 0;
        for mut sub in self.scan::<Subscription>(CF_SUBSCRIPTIONS)? {
            if sub.expire_if_due(now) {
                self.put_json(&mut batch, CF_SUBSCRIPTIONS, &subscription_key(sub.id), &sub)?;
                expired += 1;
            }
        }
        if expired > 0 {
            self.db.write(batch)?;
        }
        Ok(expired)
    }

    async fn revoke_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut sub: Subscription = self
            .get_json(CF_SUBSCRIPTIONS, &subscription_key(id))?
            .ok_or_else(|| ShopError::NotFound(format!("subscription {id}")))?;
        if !sub.revoke() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_SUBSCRIPTIONS, &subscription_key(id), &sub)?;
        self.db.write(batch)?;
        Ok(true)
    }
}
