//! Configuration for the storefront

use crate::application::engine::EngineSettings;
use crate::application::retry::RetryPolicy;
use crate::application::scheduler::ScheduleConfig;
use crate::domain::account::{AccountId, Amount};
use crate::domain::plan::{Catalog, PlanId};
use crate::error::{Result, ShopError};
use crate::infrastructure::xui::PanelConfig;
use crate::infrastructure::yoomoney::YooMoneyConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storefront configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub yoomoney: YooMoneyConfig,
    pub panel: PanelConfig,
    pub schedule: ScheduleConfig,
    pub reconciliation: ReconciliationConfig,
    /// Plans offered for sale
    pub plans: Catalog,
    /// Accounts allowed to run administrative commands
    pub admin_ids: Vec<i64>,
}

/// Ledger storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// RocksDB directory. In-memory when absent.
    pub path: Option<PathBuf>,
}

/// Reconciliation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Minutes a deposit may stay unpaid before it is failed
    pub deposit_horizon_minutes: i64,
    pub provisioning_retry: RetryPolicy,
    pub panel_call_timeout_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            deposit_horizon_minutes: 24 * 60,
            provisioning_retry: RetryPolicy::default(),
            panel_call_timeout_secs: 15,
        }
    }
}

const PRICE_VARS: [(&str, &str); 4] = [
    ("PRICE_1_MONTH", "1_month"),
    ("PRICE_3_MONTHS", "3_months"),
    ("PRICE_6_MONTHS", "6_months"),
    ("PRICE_12_MONTHS", "12_months"),
];

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map_err(|e| ShopError::Config(format!("Invalid admin id '{}': {}", id, e)))
        })
        .collect()
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ShopError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from a variable lookup, starting from the defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(token) = var("YOOMONEY_TOKEN") {
            config.yoomoney.token = token;
        }
        if let Some(receiver) = var("YOOMONEY_RECEIVER") {
            config.yoomoney.receiver = receiver;
        }
        if let Some(url) = var("XUI_PANEL_URL") {
            config.panel.url = url;
        }
        if let Some(username) = var("XUI_USERNAME") {
            config.panel.username = username;
        }
        if let Some(password) = var("XUI_PASSWORD") {
            config.panel.password = password;
        }
        if let Some(path) = var("DATABASE_PATH") {
            config.database.path = Some(PathBuf::from(path));
        }
        if let Some(ids) = var("ADMIN_IDS") {
            config.admin_ids = parse_admin_ids(&ids)?;
        }
        for (name, plan) in PRICE_VARS {
            if let Some(raw) = var(name) {
                let value: Decimal = raw
                    .trim()
                    .parse()
                    .map_err(|e| ShopError::Config(format!("Invalid {}: {}", name, e)))?;
                let price = Amount::new(value)
                    .map_err(|e| ShopError::Config(format!("Invalid {}: {}", name, e)))?;
                config.plans.set_price(&PlanId::from(plan), price);
            }
        }

        Ok(config)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            deposit_horizon: chrono::Duration::minutes(self.reconciliation.deposit_horizon_minutes),
            provisioning_retry: self.reconciliation.provisioning_retry.clone(),
            panel_call_timeout: Duration::from_secs(self.reconciliation.panel_call_timeout_secs),
        }
    }

    pub fn is_admin(&self, account: AccountId) -> bool {
        self.admin_ids.contains(&account.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.plans.plans().len(), 4);
        assert!(config.database.path.is_none());
        assert_eq!(config.schedule.deposit_sweep_interval_secs, 30);
        assert_eq!(
            config.engine_settings().deposit_horizon,
            chrono::Duration::hours(24)
        );
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("YOOMONEY_TOKEN", "tok"),
            ("XUI_PANEL_URL", "https://panel.example:2053"),
            ("ADMIN_IDS", "1, 2,,3"),
            ("PRICE_3_MONTHS", "270"),
            ("DATABASE_PATH", "/var/lib/storefront"),
        ]);
        let config = Config::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.yoomoney.token, "tok");
        assert_eq!(config.panel.url, "https://panel.example:2053");
        assert_eq!(config.admin_ids, vec![1, 2, 3]);
        assert!(config.is_admin(AccountId(2)));
        assert!(!config.is_admin(AccountId(4)));
        assert_eq!(
            config
                .plans
                .get(&PlanId::from("3_months"))
                .unwrap()
                .price
                .value(),
            dec!(270)
        );
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/storefront"))
        );
    }

    #[test]
    fn test_from_vars_rejects_bad_price() {
        let result = Config::from_vars(|name| (name == "PRICE_1_MONTH").then(|| "0".to_string()));
        assert!(matches!(result, Err(ShopError::Config(_))));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            admin_ids = [10]

            [panel]
            url = "http://10.0.0.2:2053"
            username = "root"
            password = "pw"

            [reconciliation]
            deposit_horizon_minutes = 60

            [reconciliation.provisioning_retry]
            max_attempts = 2
            initial_delay_ms = 10
            max_delay_ms = 20
            backoff_multiplier = 2.0

            [[plans]]
            id = "week"
            title = "1 week"
            price = "30"
            duration_days = 7
            inbound_id = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.panel.timeout_seconds, 10);
        assert_eq!(config.reconciliation.panel_call_timeout_secs, 15);
        assert_eq!(config.engine_settings().provisioning_retry.max_attempts, 2);
        assert_eq!(config.plans.plans().len(), 1);
        assert_eq!(
            config.plans.get(&PlanId::from("week")).unwrap().inbound_id,
            Some(4)
        );
    }
}
