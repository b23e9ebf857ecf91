#![allow(dead_code)]

use access_storefront::application::engine::{DepositOutcome, EngineSettings, ReconciliationEngine};
use access_storefront::application::retry::RetryPolicy;
use access_storefront::domain::account::{AccountId, Amount};
use access_storefront::domain::payment::{PaymentInstructions, PaymentRef, SettlementStatus};
use access_storefront::domain::plan::Catalog;
use access_storefront::domain::ports::{AccessPanel, PaymentProcessor};
use access_storefront::domain::provisioning::{ClientSpec, Inbound, PanelClient, PanelError};
use access_storefront::error::{Result, ShopError};
use access_storefront::infrastructure::clock::ManualClock;
use access_storefront::infrastructure::in_memory::InMemoryLedgerStore;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Payment processor whose settlement answers are set by the test.
#[derive(Default)]
pub struct ScriptedProcessor {
    statuses: Mutex<HashMap<PaymentRef, SettlementStatus>>,
    unavailable: AtomicBool,
    pub requests: AtomicUsize,
    pub polls: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn settle(&self, payment_ref: &PaymentRef) {
        self.set(payment_ref, SettlementStatus::Settled);
    }

    pub fn refuse(&self, payment_ref: &PaymentRef) {
        self.set(payment_ref, SettlementStatus::Failed);
    }

    pub fn set(&self, payment_ref: &PaymentRef, status: SettlementStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(payment_ref.clone(), status);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_payment_request(
        &self,
        payment_ref: &PaymentRef,
        amount: Amount,
    ) -> Result<PaymentInstructions> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ShopError::GatewayUnavailable("connection refused".into()));
        }
        Ok(PaymentInstructions {
            redirect_url: format!("https://pay.test/{}?sum={}", payment_ref, amount),
        })
    }

    async fn settlement_status(&self, payment_ref: &PaymentRef) -> Result<SettlementStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent reconciliations interleave.
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ShopError::GatewayUnavailable("connection refused".into()));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(payment_ref)
            .copied()
            .unwrap_or(SettlementStatus::Pending))
    }
}

/// In-process stand-in for the access panel.
pub struct FakePanel {
    clients: Mutex<HashMap<String, PanelClient>>,
    inbounds: Vec<Inbound>,
    logged_in: AtomicBool,
    /// Errors returned by the next `add_client` calls, in order.
    add_failures: Mutex<VecDeque<PanelError>>,
    /// Errors returned by the next `add_client` calls after the client was stored.
    lost_answers: Mutex<VecDeque<PanelError>>,
    add_delay: Mutex<Option<Duration>>,
    pub logins: AtomicUsize,
    pub add_calls: AtomicUsize,
}

impl Default for FakePanel {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            inbounds: vec![
                Inbound {
                    id: 1,
                    remark: "disabled".into(),
                    protocol: "vless".into(),
                    port: 443,
                    enable: false,
                },
                Inbound {
                    id: 2,
                    remark: "main".into(),
                    protocol: "vless".into(),
                    port: 8443,
                    enable: true,
                },
            ],
            logged_in: AtomicBool::new(false),
            add_failures: Mutex::new(VecDeque::new()),
            lost_answers: Mutex::new(VecDeque::new()),
            add_delay: Mutex::new(None),
            logins: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
        }
    }
}

impl FakePanel {
    pub fn fail_next_adds(&self, errors: impl IntoIterator<Item = PanelError>) {
        self.add_failures.lock().unwrap().extend(errors);
    }

    /// The next `add_client` stores the client but answers with `error`.
    pub fn lose_next_answer(&self, error: PanelError) {
        self.lost_answers.lock().unwrap().push_back(error);
    }

    pub fn delay_adds(&self, delay: Duration) {
        *self.add_delay.lock().unwrap() = Some(delay);
    }

    pub fn expire_session(&self) {
        self.logged_in.store(false, Ordering::SeqCst);
    }

    pub fn insert_client(&self, client: PanelClient) {
        self.clients
            .lock()
            .unwrap()
            .insert(client.label.clone(), client);
    }

    pub fn client(&self, label: &str) -> Option<PanelClient> {
        self.clients.lock().unwrap().get(label).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    fn check_session(&self) -> std::result::Result<(), PanelError> {
        if self.logged_in.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PanelError::Unauthorized)
        }
    }
}

#[async_trait]
impl AccessPanel for FakePanel {
    async fn login(&self) -> std::result::Result<(), PanelError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_inbounds(&self) -> std::result::Result<Vec<Inbound>, PanelError> {
        self.check_session()?;
        Ok(self.inbounds.clone())
    }

    async fn find_client(&self, label: &str) -> std::result::Result<Option<PanelClient>, PanelError> {
        self.check_session()?;
        Ok(self.client(label))
    }

    async fn add_client(
        &self,
        inbound_id: u32,
        spec: &ClientSpec,
    ) -> std::result::Result<(), PanelError> {
        self.check_session()?;
        self.add_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.add_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.add_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        if self.clients.lock().unwrap().contains_key(&spec.label) {
            return Err(PanelError::Rejected(format!("Duplicate email: {}", spec.label)));
        }

        self.insert_client(PanelClient {
            inbound_id,
            label: spec.label.clone(),
            enable: spec.enable,
            expiry_time: spec.expiry_time,
            up: 0,
            down: 0,
        });

        let lost = self.lost_answers.lock().unwrap().pop_front();
        match lost {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub processor: Arc<ScriptedProcessor>,
    pub panel: Arc<FakePanel>,
    pub clock: ManualClock,
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        deposit_horizon: chrono::Duration::hours(24),
        provisioning_retry: RetryPolicy::immediate(3),
        panel_call_timeout: Duration::from_secs(5),
    }
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: EngineSettings) -> Harness {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let processor = Arc::new(ScriptedProcessor::default());
    let panel = Arc::new(FakePanel::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

    let engine = Arc::new(ReconciliationEngine::new(
        ledger.clone(),
        processor.clone(),
        panel.clone(),
        Arc::new(clock.clone()),
        Catalog::default(),
        settings,
    ));

    Harness {
        engine,
        ledger,
        processor,
        panel,
        clock,
    }
}

impl Harness {
    /// Deposits `amount` for `account` and confirms it, returning the reference.
    pub async fn fund(&self, account: AccountId, amount: Decimal) -> PaymentRef {
        let opened = self.engine.request_deposit(account, amount).await.unwrap();
        self.processor.settle(&opened.payment_ref);
        assert_eq!(
            self.engine
                .confirm_deposit(&opened.payment_ref)
                .await
                .unwrap(),
            DepositOutcome::Credited
        );
        opened.payment_ref
    }

    pub async fn balance(&self, account: AccountId) -> Decimal {
        self.engine.get_balance(account).await.unwrap().value()
    }
}
