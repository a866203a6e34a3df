//! Rule-based pattern detection run before narrative generation.
//!
//! Two stateless detectors over one case's transactions. Their output is
//! fed to the prompt only as rule names and counts.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::Transaction;

/// Adjacent large transactions closer than this are rapid movement.
const RAPID_MOVEMENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Cash reporting threshold; structuring sits just under it.
    pub reporting_threshold: f64,
    /// Both legs of a rapid-movement pair must exceed this.
    pub rapid_movement_amount: f64,
    /// Lower edge of the structuring band as a fraction of the threshold.
    pub structuring_band: f64,
}

impl RuleThresholds {
    pub fn new(reporting_threshold: f64, rapid_movement_amount: f64) -> Self {
        Self {
            reporting_threshold,
            rapid_movement_amount,
            structuring_band: 0.9,
        }
    }

    /// `[band * threshold, threshold)`
    pub fn structuring_range(&self) -> (f64, f64) {
        (
            self.reporting_threshold * self.structuring_band,
            self.reporting_threshold,
        )
    }
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self::new(10_000.0, 5_000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Structuring,
    RapidMovement,
}

impl FindingKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structuring => "Structuring",
            Self::RapidMovement => "Rapid Movement",
        }
    }
}

/// One detector hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub transaction_ids: Vec<String>,
    pub reason: String,
}

/// Detector output for one case. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFindings {
    pub structuring: Vec<Finding>,
    pub rapid_movement: Vec<Finding>,
    pub total_volume: f64,
    pub txn_count: usize,
}

impl AnalysisFindings {
    pub fn is_empty(&self) -> bool {
        self.structuring.is_empty() && self.rapid_movement.is_empty()
    }

    pub fn finding_count(&self) -> usize {
        self.structuring.len() + self.rapid_movement.len()
    }

    /// Generalized lines for the prompt: rule names and counts only.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.structuring.is_empty() {
            lines.push(format!(
                "{}: {} transaction(s) just below the reporting threshold",
                FindingKind::Structuring.label(),
                self.structuring.len()
            ));
        }
        if !self.rapid_movement.is_empty() {
            lines.push(format!(
                "{}: {} consecutive pair(s) of large transactions within {} hours",
                FindingKind::RapidMovement.label(),
                self.rapid_movement.len(),
                RAPID_MOVEMENT_WINDOW_HOURS
            ));
        }
        lines
    }
}

/// Deterministic detectors, configured once with thresholds.
#[derive(Debug, Clone, Default)]
pub struct RuleAnalyzer {
    thresholds: RuleThresholds,
}

impl RuleAnalyzer {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    /// Transactions just below the reporting threshold.
    pub fn detect_structuring(&self, transactions: &[Transaction]) -> Vec<Finding> {
        let (low, high) = self.thresholds.structuring_range();
        transactions
            .iter()
            .filter(|t| t.amount >= low && t.amount < high)
            .map(|t| Finding {
                kind: FindingKind::Structuring,
                transaction_ids: vec![t.transaction_id.clone()],
                reason: format!(
                    "Amount {:.2} is just below the {:.2} reporting threshold.",
                    t.amount, high
                ),
            })
            .collect()
    }

    /// Consecutive-in-time pairs of large transactions within the window.
    pub fn detect_rapid_movement(&self, transactions: &[Transaction]) -> Vec<Finding> {
        if transactions.len() < 2 {
            return Vec::new();
        }

        let mut sorted: Vec<&Transaction> = transactions.iter().collect();
        sorted.sort_by_key(|t| t.timestamp);

        let window = Duration::hours(RAPID_MOVEMENT_WINDOW_HOURS);
        let floor = self.thresholds.rapid_movement_amount;

        sorted
            .windows(2)
            .filter(|pair| {
                let (a, b) = (pair[0], pair[1]);
                a.amount > floor && b.amount > floor && (b.timestamp - a.timestamp) < window
            })
            .map(|pair| Finding {
                kind: FindingKind::RapidMovement,
                transaction_ids: vec![
                    pair[0].transaction_id.clone(),
                    pair[1].transaction_id.clone(),
                ],
                reason: format!(
                    "Large transactions within {} hours.",
                    RAPID_MOVEMENT_WINDOW_HOURS
                ),
            })
            .collect()
    }

    pub fn analyze(&self, transactions: &[Transaction]) -> AnalysisFindings {
        let findings = AnalysisFindings {
            structuring: self.detect_structuring(transactions),
            rapid_movement: self.detect_rapid_movement(transactions),
            total_volume: transactions.iter().map(|t| t.amount).sum(),
            txn_count: transactions.len(),
        };
        tracing::debug!(
            txn_count = findings.txn_count,
            structuring = findings.structuring.len(),
            rapid_movement = findings.rapid_movement.len(),
            "Rule analysis complete"
        );
        findings
    }
}
