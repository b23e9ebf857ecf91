use super::subscription::CredentialRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result of a provisioning attempt.
///
/// The two failure classes carry operator-facing detail for logging only.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome {
    /// `expires_at` is the expiry the credential actually carries on the panel.
    Provisioned {
        credential: CredentialRef,
        expires_at: DateTime<Utc>,
    },
    TransientFailure(String),
    PermanentFailure(String),
}

/// Errors reported by an access panel adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelError {
    /// The session is missing or expired.
    #[error("panel session is not authenticated")]
    Unauthorized,
    #[error("panel unreachable: {0}")]
    Unreachable(String),
    #[error("panel call timed out")]
    Timeout,
    /// The panel understood the request and refused it.
    #[error("panel rejected the request: {0}")]
    Rejected(String),
}

/// An access point on the panel that clients are attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub id: u32,
    pub remark: String,
    pub protocol: String,
    pub port: u16,
    pub enable: bool,
}

/// The panel's view of one client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelClient {
    pub inbound_id: u32,
    pub label: String,
    pub enable: bool,
    /// Expiry as unix milliseconds, `0` meaning unlimited.
    pub expiry_time: i64,
    pub up: u64,
    pub down: u64,
}

impl PanelClient {
    /// Expiry as a timestamp, `None` when unlimited or out of range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.expiry_time > 0 {
            DateTime::from_timestamp_millis(self.expiry_time)
        } else {
            None
        }
    }
}

/// A client identity to create on an inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSpec {
    pub client_id: Uuid,
    pub label: String,
    pub limit_ip: u32,
    /// Expiry as unix milliseconds.
    pub expiry_time: i64,
    pub enable: bool,
}
