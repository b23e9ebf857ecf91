use super::account::{AccountId, Amount};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique reference of a payment, also used as the label on the processor side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(String);

impl PaymentRef {
    /// Generates a fresh reference for a deposit by `account`.
    ///
    /// Every call yields a new value, so two deposits of the same amount by the same
    /// user never share a reference.
    pub fn generate(account: AccountId) -> Self {
        Self(format!("{}-{}", account, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PaymentRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

/// A deposit requested by a user and awaiting confirmation from the processor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentIntent {
    pub payment_ref: PaymentRef,
    pub account: AccountId,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    /// When the intent reached `Settled` or `Failed`.
    pub closed_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn new(
        payment_ref: PaymentRef,
        account: AccountId,
        amount: Amount,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_ref,
            account,
            amount,
            status: PaymentStatus::Pending,
            created_at,
            closed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    /// True once `horizon` has elapsed since the intent was opened.
    pub fn is_past_horizon(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        now - self.created_at >= horizon
    }
}

/// What the processor reports about a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
    Settled,
    Pending,
    Failed,
}

/// Result of `LedgerStore::credit_if_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied,
    AlreadyApplied,
    NotFound,
    /// The intent already failed; the balance is left untouched.
    Closed,
}

/// What the user is told to do to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstructions {
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedIntent {
    pub payment_ref: PaymentRef,
    pub instructions: PaymentInstructions,
}
