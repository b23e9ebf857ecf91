use super::account::{AccountId, Amount};
use super::plan::PlanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Revoked,
}

/// Reference to a client identity created on the access panel.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CredentialRef {
    pub inbound_id: u32,
    /// The identity label (the panel's `email` field).
    pub label: String,
    pub client_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub account: AccountId,
    pub plan: PlanId,
    pub credential: CredentialRef,
    pub expires_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Moves an active subscription past its expiry to `Expired`.
    ///
    /// Returns `true` only when the status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_active() && self.expires_at <= now {
            self.status = SubscriptionStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Returns `true` only when the status changed.
    pub fn revoke(&mut self) -> bool {
        if self.is_active() {
            self.status = SubscriptionStatus::Revoked;
            true
        } else {
            false
        }
    }
}

/// The subscription data handed to `commit_reservation`; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub credential: CredentialRef,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Single-use handle on a held debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationToken(Uuid);

impl ReservationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short stable string identifying the purchase attempt this token belongs to.
    pub fn epoch(&self) -> String {
        self.0.simple().to_string()[..12].to_string()
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A debit taken from an account while its credential is being provisioned.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Reservation {
    pub token: ReservationToken,
    pub account: AccountId,
    pub amount: Amount,
    pub plan: PlanId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Reserved(Reservation),
    InsufficientFunds { balance: rust_decimal::Decimal },
}
