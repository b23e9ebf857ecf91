use crate::domain::account::Account;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow {
    account: i64,
    balance: String,
    created_at: String,
}

/// Writes account balances as CSV (`account,balance,created_at`).
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = Account>) -> Result<()> {
        for account in accounts {
            self.writer.serialize(AccountRow {
                account: account.id.0,
                balance: account.balance.value().normalize().to_string(),
                created_at: account.created_at.to_rfc3339(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountId, Amount};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_write_accounts() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut funded = Account::new(AccountId(7), created);
        funded.credit(Amount::new(dec!(150.50)).unwrap());

        let mut out = Vec::new();
        AccountWriter::new(&mut out)
            .write_accounts(vec![Account::new(AccountId(1), created), funded])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("account,balance,created_at"));
        assert_eq!(lines.next(), Some("1,0,2024-01-02T03:04:05+00:00"));
        assert_eq!(lines.next(), Some("7,150.5,2024-01-02T03:04:05+00:00"));
    }
}
