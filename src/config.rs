use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::analysis::RuleThresholds;

/// Application-level constants
pub const APP_NAME: &str = "sarscribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default generation model.
pub const DEFAULT_MODEL: &str = "llama3";

/// Narrative generation can take minutes on CPU-only hosts.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Number of transactions sampled into the prompt.
pub const DEFAULT_TRANSACTION_SAMPLE: usize = 5;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "sarscribe=info"
}

// ═══════════════════════════════════════════════════════════
// Regions
// ═══════════════════════════════════════════════════════════

/// Supported reporting jurisdictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    #[default]
    Us,
    India,
}

impl Region {
    /// Resolve a caller-supplied region code. Unknown codes fall back to `Us`.
    pub fn from_code(code: &str) -> Self {
        Self::from_code_or(code, Self::Us)
    }

    /// Resolve a region code, using `fallback` for unknown or blank codes.
    pub fn from_code_or(code: &str, fallback: Region) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "IN" | "IND" | "INDIA" => Self::India,
            "US" | "USA" => Self::Us,
            other => {
                tracing::debug!(code = %other, fallback = %fallback, "Unknown region code");
                fallback
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::India => "IN",
        }
    }

    pub fn profile(&self) -> RegionProfile {
        match self {
            Self::Us => RegionProfile {
                region: *self,
                currency_symbol: "$",
                currency_code: "USD",
                date_format: "%Y-%m-%d",
                regulator_name: "FinCEN",
                report_name: "Suspicious Activity Report",
                report_id_prefix: "SAR",
                thresholds: RuleThresholds::new(10_000.0, 5_000.0),
            },
            Self::India => RegionProfile {
                region: *self,
                currency_symbol: "₹",
                currency_code: "INR",
                date_format: "%d-%m-%Y",
                regulator_name: "FIU-IND",
                report_name: "Suspicious Transaction Report (STR)",
                report_id_prefix: "STR",
                // 10 lakh / 5 lakh
                thresholds: RuleThresholds::new(1_000_000.0, 500_000.0),
            },
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static reporting conventions for one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionProfile {
    pub region: Region,
    pub currency_symbol: &'static str,
    pub currency_code: &'static str,
    /// chrono strftime pattern.
    pub date_format: &'static str,
    pub regulator_name: &'static str,
    pub report_name: &'static str,
    pub report_id_prefix: &'static str,
    pub thresholds: RuleThresholds,
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

/// Process settings. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub ollama_url: String,
    pub model: String,
    pub timeout: Duration,
    pub default_region: Region,
    /// Rule thresholds used by the analyzer for every region.
    pub thresholds: RuleThresholds,
    /// When set, the analyzer uses each request region's own thresholds.
    pub region_thresholds: bool,
    pub transaction_sample: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_region: Region::Us,
            thresholds: RuleThresholds::default(),
            region_thresholds: false,
            transaction_sample: DEFAULT_TRANSACTION_SAMPLE,
        }
    }
}

impl Settings {
    /// Read settings from `SARSCRIBE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Invalid values
    /// keep the default and log a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup("SARSCRIBE_OLLAMA_URL").filter(|v| !v.trim().is_empty()) {
            settings.ollama_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("SARSCRIBE_MODEL").filter(|v| !v.trim().is_empty()) {
            settings.model = model.trim().to_string();
        }
        if let Some(raw) = lookup("SARSCRIBE_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %raw, "Ignoring invalid SARSCRIBE_TIMEOUT_SECS"),
            }
        }
        if let Some(code) = lookup("SARSCRIBE_REGION") {
            settings.default_region = Region::from_code(&code);
        }
        if let Some(raw) = lookup("SARSCRIBE_REGION_THRESHOLDS") {
            settings.region_thresholds = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(raw) = lookup("SARSCRIBE_TRANSACTION_SAMPLE") {
            match raw.trim().parse::<usize>() {
                Ok(n) => settings.transaction_sample = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid SARSCRIBE_TRANSACTION_SAMPLE"),
            }
        }

        settings
    }

    /// Thresholds the analyzer should apply for `region`.
    pub fn thresholds_for(&self, region: Region) -> RuleThresholds {
        if self.region_thresholds {
            region.profile().thresholds
        } else {
            self.thresholds.clone()
        }
    }
}
