use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ReportStatus;
use crate::pipeline::NarrativeWarning;

/// Named report sections returned alongside the rendered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    /// Stitched narrative with real values.
    pub narrative: String,
    /// Placeholder-bearing narrative; the only form safe to store at rest.
    pub narrative_template: String,
    /// Generalized rule-engine summary.
    pub automated_analysis: String,
}

/// Output handed back to the workflow for persistence and review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarResponse {
    pub report_id: String,
    pub content: String,
    pub sections: ReportSections,
    pub generated_at: DateTime<Utc>,
    pub status: ReportStatus,
    /// Recoverable issues a reviewer must see. Empty on a clean run.
    pub warnings: Vec<NarrativeWarning>,
}

impl SarResponse {
    pub fn needs_attention(&self) -> bool {
        !self.warnings.is_empty()
    }
}
