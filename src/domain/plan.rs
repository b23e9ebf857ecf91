use super::account::Amount;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-boxed access plan offered for sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub title: String,
    pub price: Amount,
    pub duration_days: u32,
    /// Inbound to provision on. `None` picks the first enabled inbound.
    #[serde(default)]
    pub inbound_id: Option<u32>,
    /// Maximum concurrent client IPs allowed on the credential.
    #[serde(default = "default_limit_ip")]
    pub limit_ip: u32,
}

fn default_limit_ip() -> u32 {
    1
}

impl Plan {
    pub fn new(id: &str, title: &str, price: Amount, duration_days: u32) -> Self {
        Self {
            id: PlanId::from(id),
            title: title.to_string(),
            price,
            duration_days,
            inbound_id: None,
            limit_ip: default_limit_ip(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }
}

/// The set of plans the storefront sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    plans: Vec<Plan>,
}

impl Catalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn get(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|plan| &plan.id == id)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Replaces the price of an existing plan.
    pub fn set_price(&mut self, id: &PlanId, price: Amount) {
        if let Some(plan) = self.plans.iter_mut().find(|plan| &plan.id == id) {
            plan.price = price;
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(vec![
            Plan::new("1_month", "1 month", Amount::from_units(100), 30),
            Plan::new("3_months", "3 months", Amount::from_units(250), 90),
            Plan::new("6_months", "6 months", Amount::from_units(450), 180),
            Plan::new("12_months", "12 months", Amount::from_units(800), 365),
        ])
    }
}
