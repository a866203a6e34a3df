use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Severity;
use crate::config::Region;

fn default_risk_rating() -> String {
    "LOW".into()
}

fn default_kyc_status() -> String {
    "VERIFIED".into()
}

fn default_occupation() -> String {
    "Retail Customer".into()
}

fn default_turnover() -> f64 {
    50_000.0
}

fn default_currency() -> String {
    "USD".into()
}

fn default_transaction_type() -> String {
    "WIRE".into()
}

fn default_region() -> String {
    "US".into()
}

/// Subject of the case. `name`, `customer_id`, `account_number`, `email`
/// and `country` are PII and never reach the narrative generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub account_number: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_risk_rating")]
    pub risk_rating: String,
    #[serde(default = "default_kyc_status")]
    pub kyc_status: String,
    #[serde(default = "default_occupation")]
    pub occupation: String,
    #[serde(default = "default_turnover")]
    pub expected_monthly_turnover: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub sender_account: String,
    pub receiver_account: String,
    /// Free text; may name merchants or people, so it is never prompted.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub rule_name: String,
    pub severity: Severity,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// One case submitted for narrative generation. The pipeline only borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub customer: Customer,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub typology: Option<String>,
    /// Caller case reference. Generated per request when absent.
    #[serde(default)]
    pub case_id: Option<String>,
}

impl GenerateRequest {
    pub fn region(&self) -> Region {
        Region::from_code(&self.region)
    }

    /// Region for this request, with `fallback` for unknown or blank codes.
    pub fn region_or(&self, fallback: Region) -> Region {
        Region::from_code_or(&self.region, fallback)
    }

    pub fn total_volume(&self) -> f64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }
}
