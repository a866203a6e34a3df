pub mod placeholder;
pub mod analysis;
pub mod sanitize;
pub mod prompt;
pub mod leakage;
pub mod stitcher;
pub mod llm;
pub mod output_sanitize;
pub mod audit;
pub mod report;
pub mod generation; // Single-case orchestrator: analyze → prompt → generate → guard → stitch
pub mod jobs; // Async runner: timeouts, progress, batches

pub use placeholder::*;
pub use analysis::*;
pub use prompt::*;
pub use leakage::*;
pub use stitcher::*;
pub use llm::*;
pub use audit::*;
pub use generation::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that stop a generation request. Nothing is produced.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Narrative generator unavailable: {0}")]
    GenerationUnavailable(#[from] LlmError),

    #[error("Generator returned an empty narrative")]
    EmptyNarrative,

    #[error("Prompt for case contains real {0:?} values")]
    PromptLeak(Vec<PlaceholderKey>),

    #[error("Generation task aborted: {0}")]
    Aborted(String),
}

/// Recoverable issues. The report is still produced, flagged for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NarrativeWarning {
    /// A real value appeared in the raw narrative and was replaced by its
    /// token. `residual` means the replacement did not remove every match.
    LeakageDetected {
        keys: Vec<PlaceholderKey>,
        residual: bool,
    },
    /// The map had no value for a token the narrative used.
    MissingPiiKey { key: PlaceholderKey },
    /// Tokens survived stitching, or stray single braces were found.
    MalformedVocabulary {
        unresolved: Vec<String>,
        stray_braces: bool,
    },
    /// The narrative ends abruptly.
    PossiblyTruncated,
}

impl NarrativeWarning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeakageDetected { .. } => "leakage_detected",
            Self::MissingPiiKey { .. } => "missing_pii_key",
            Self::MalformedVocabulary { .. } => "malformed_vocabulary",
            Self::PossiblyTruncated => "possibly_truncated",
        }
    }
}
