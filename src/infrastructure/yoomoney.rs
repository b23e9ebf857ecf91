//! YooMoney payment processor adapter.
//!
//! Payment requests are quickpay "shop" forms labelled with the payment reference;
//! settlement is read from the wallet's operation history filtered by that label.

use crate::domain::account::Amount;
use crate::domain::payment::{PaymentInstructions, PaymentRef, SettlementStatus};
use crate::domain::ports::PaymentProcessor;
use crate::error::{Result, ShopError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// YooMoney adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YooMoneyConfig {
    /// Wallet API base, e.g. `https://yoomoney.ru`
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Quickpay form endpoint
    #[serde(default = "default_quickpay_url")]
    pub quickpay_url: String,
    /// OAuth token with `operation-history` scope
    #[serde(default)]
    pub token: String,
    /// Wallet number receiving the payments
    #[serde(default)]
    pub receiver: String,
    /// Payment purpose shown on the form
    #[serde(default = "default_targets")]
    pub targets: String,
    /// Quickpay payment type (`SB`, `AC`, `PC`)
    #[serde(default = "default_payment_type")]
    pub payment_type: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://yoomoney.ru".to_string()
}

fn default_quickpay_url() -> String {
    "https://yoomoney.ru/quickpay/confirm.xml".to_string()
}

fn default_targets() -> String {
    "Balance top-up".to_string()
}

fn default_payment_type() -> String {
    "SB".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

impl Default for YooMoneyConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            quickpay_url: default_quickpay_url(),
            token: String::new(),
            receiver: String::new(),
            targets: default_targets(),
            payment_type: default_payment_type(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    #[serde(default)]
    operations: Vec<Operation>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    status: String,
    label: Option<String>,
}

/// Maps a history page to a settlement status for `payment_ref`.
///
/// Only operations whose label equals the reference count. One successful operation
/// settles the payment; otherwise a refused one fails it.
fn status_from_history(history: &OperationHistory, payment_ref: &PaymentRef) -> SettlementStatus {
    let matching = history
        .operations
        .iter()
        .filter(|op| op.label.as_deref() == Some(payment_ref.as_str()));

    let mut status = SettlementStatus::Pending;
    for op in matching {
        match op.status.as_str() {
            "success" => return SettlementStatus::Settled,
            "refused" => status = SettlementStatus::Failed,
            _ => {}
        }
    }
    status
}

/// YooMoney processor
pub struct YooMoneyProcessor {
    config: YooMoneyConfig,
    client: Client,
}

impl YooMoneyProcessor {
    /// Builds the adapter. Without a token and receiver every call reports the
    /// processor as unavailable.
    pub fn new(config: YooMoneyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ShopError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.config.token.is_empty() || self.config.receiver.is_empty() {
            return Err(ShopError::GatewayUnavailable(
                "YooMoney is not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for YooMoneyProcessor {
    async fn create_payment_request(
        &self,
        payment_ref: &PaymentRef,
        amount: Amount,
    ) -> Result<PaymentInstructions> {
        self.ensure_configured()?;
        let sum = amount.value().to_string();
        let form = [
            ("receiver", self.config.receiver.as_str()),
            ("quickpay-form", "shop"),
            ("targets", self.config.targets.as_str()),
            ("paymentType", self.config.payment_type.as_str()),
            ("sum", sum.as_str()),
            ("label", payment_ref.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.quickpay_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ShopError::GatewayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ShopError::GatewayUnavailable(format!(
                "quickpay returned {}",
                response.status()
            )));
        }

        debug!(payment_ref = %payment_ref, url = %response.url(), "Quickpay form created");
        Ok(PaymentInstructions {
            redirect_url: response.url().to_string(),
        })
    }

    async fn settlement_status(&self, payment_ref: &PaymentRef) -> Result<SettlementStatus> {
        self.ensure_configured()?;
        let response = self
            .client
            .post(format!("{}/api/operation-history", self.config.api_base))
            .bearer_auth(&self.config.token)
            .form(&[("label", payment_ref.as_str()), ("records", "30")])
            .send()
            .await
            .map_err(|e| ShopError::GatewayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ShopError::GatewayUnavailable(format!(
                "operation-history returned {}",
                response.status()
            )));
        }

        let history: OperationHistory = response
            .json()
            .await
            .map_err(|e| ShopError::GatewayUnavailable(e.to_string()))?;

        if let Some(error) = &history.error {
            warn!(payment_ref = %payment_ref, error = %error, "Operation history query refused");
            return Err(ShopError::GatewayUnavailable(error.clone()));
        }

        Ok(status_from_history(&history, payment_ref))
    }
}
