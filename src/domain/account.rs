use crate::error::ShopError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Opaque identifier of a storefront user (the chat user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monetary balance held by an account.
///
/// Wraps `rust_decimal::Decimal`. A `Balance` is never negative: the only way to
/// decrease one is `checked_sub`, which refuses to go below zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(Decimal);

/// A strictly positive monetary amount for deposits, prices and reservations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, ShopError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(ShopError::InvalidInput(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    /// Whole-unit amount; zero is raised to one.
    pub const fn from_units(units: u32) -> Self {
        let units = if units == 0 { 1 } else { units };
        Self(Decimal::from_parts(units, 0, 0, false, 0))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = ShopError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Builds a balance, rejecting negative values.
    pub fn new(value: Decimal) -> Result<Self, ShopError> {
        if value >= Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(ShopError::InvalidInput(format!(
                "balance cannot be negative, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Subtracts `amount`, or returns `None` if the result would be negative.
    pub fn checked_sub(self, amount: Amount) -> Option<Self> {
        if self.0 >= amount.0 {
            Some(Self(self.0 - amount.0))
        } else {
            None
        }
    }
}

impl Add<Amount> for Balance {
    type Output = Self;
    fn add(self, rhs: Amount) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Amount> for Balance {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user's account in the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: Balance::ZERO,
            created_at,
        }
    }

    /// Adds a settled deposit or a released reservation to the balance.
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount;
    }

    /// Takes `amount` off the balance if it is covered.
    pub fn debit(&mut self, amount: Amount) -> Result<(), ShopError> {
        match self.balance.checked_sub(amount) {
            Some(remaining) => {
                self.balance = remaining;
                Ok(())
            }
            None => Err(ShopError::InsufficientFunds {
                balance: self.balance.value(),
                required: amount.value(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(ShopError::InvalidInput(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(ShopError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_amount_deserialization_rejects_zero() {
        assert!(serde_json::from_str::<Amount>("\"0\"").is_err());
        let parsed: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(parsed.value(), dec!(12.50));
    }

    #[test]
    fn test_balance_never_negative() {
        assert!(Balance::new(dec!(-0.01)).is_err());
        let balance = Balance::new(dec!(10)).unwrap();
        assert_eq!(balance.checked_sub(amount(dec!(10))), Some(Balance::ZERO));
        assert_eq!(balance.checked_sub(amount(dec!(10.01))), None);
    }

    #[test]
    fn test_account_credit() {
        let mut account = Account::new(AccountId(1), Utc::now());
        account.credit(amount(dec!(100)));
        assert_eq!(account.balance.value(), dec!(100));
    }

    #[test]
    fn test_account_debit_success() {
        let mut account = Account::new(AccountId(1), Utc::now());
        account.credit(amount(dec!(100)));

        account.debit(amount(dec!(40))).unwrap();
        assert_eq!(account.balance.value(), dec!(60));
    }

    #[test]
    fn test_account_debit_insufficient() {
        let mut account = Account::new(AccountId(1), Utc::now());
        account.credit(amount(dec!(50)));

        let result = account.debit(amount(dec!(100)));
        assert!(matches!(
            result,
            Err(ShopError::InsufficientFunds { .. })
        ));
        assert_eq!(account.balance.value(), dec!(50));
    }
}
