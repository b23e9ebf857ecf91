use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShopError>;

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Transient failure: {0}")]
    TransientFailure(String),
    #[error("Permanent failure: {0}")]
    PermanentFailure(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for ShopError {
    fn from(err: rocksdb::Error) -> Self {
        ShopError::InternalError(Box::new(err))
    }
}

impl From<serde_json::Error> for ShopError {
    fn from(err: serde_json::Error) -> Self {
        ShopError::InternalError(Box::new(err))
    }
}

/// The reason class shown to a user when an operation fails.
///
/// Raw messages from the payment processor or the panel never reach the user;
/// front-ends render this class instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    InvalidInput,
    InsufficientFunds,
    Unavailable,
    Rejected,
    NotFound,
    Internal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureClass::InvalidInput => "the request is not valid",
            FailureClass::InsufficientFunds => "not enough funds on the balance",
            FailureClass::Unavailable => "the service is temporarily unavailable, try again later",
            FailureClass::Rejected => "the request was rejected by the service",
            FailureClass::NotFound => "nothing found for this request",
            FailureClass::Internal => "an internal error occurred",
        };
        f.write_str(text)
    }
}

impl ShopError {
    pub fn class(&self) -> FailureClass {
        match self {
            ShopError::InvalidInput(_) => FailureClass::InvalidInput,
            ShopError::InsufficientFunds { .. } => FailureClass::InsufficientFunds,
            ShopError::GatewayUnavailable(_) | ShopError::TransientFailure(_) => {
                FailureClass::Unavailable
            }
            ShopError::PermanentFailure(_) => FailureClass::Rejected,
            ShopError::NotFound(_) => FailureClass::NotFound,
            ShopError::Config(_)
            | ShopError::IoError(_)
            | ShopError::CsvError(_)
            | ShopError::InternalError(_) => FailureClass::Internal,
        }
    }
}
