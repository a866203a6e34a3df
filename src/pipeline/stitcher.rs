//! Narrative lifecycle from anonymized prompt to persistable text.
//!
//! Each stage is its own type, so a narrative cannot be stitched before the
//! leakage check or persisted before re-validation:
//!
//! `PendingNarrative` (ANONYMIZED_PROMPT_SENT) → `RawNarrative`
//! (RAW_NARRATIVE_RECEIVED) → `CheckedNarrative` (LEAKAGE_CHECKED) →
//! `StitchedNarrative` (STITCHED) → `PersistableNarrative` (PERSISTABLE).

use serde::Serialize;

use super::leakage::{LeakageGuard, SensitiveValue};
use super::output_sanitize::is_likely_truncated;
use super::placeholder::{decode, find_unresolved, token_name, validate_placeholders, PiiMap};
use super::{GenerationError, NarrativeWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NarrativeStage {
    AnonymizedPromptSent,
    RawNarrativeReceived,
    LeakageChecked,
    Stitched,
    Persistable,
}

/// Replace known tokens with real values. Idempotent for a given map.
pub fn stitch(text: &str, pii: &PiiMap) -> String {
    decode(text, pii).text
}

/// Prompt has gone out; waiting on the generator.
#[derive(Debug, Clone)]
pub struct PendingNarrative {
    report_id: String,
}

impl PendingNarrative {
    pub fn new(report_id: &str) -> Self {
        Self {
            report_id: report_id.to_string(),
        }
    }

    pub fn stage(&self) -> NarrativeStage {
        NarrativeStage::AnonymizedPromptSent
    }

    /// Accept generator output. Empty output is terminal: there is
    /// nothing to stitch.
    pub fn receive(self, text: String) -> Result<RawNarrative, GenerationError> {
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyNarrative);
        }
        let mut warnings = Vec::new();
        if is_likely_truncated(&text) {
            tracing::warn!(report_id = %self.report_id, "Narrative looks truncated");
            warnings.push(NarrativeWarning::PossiblyTruncated);
        }
        Ok(RawNarrative {
            report_id: self.report_id,
            text,
            warnings,
        })
    }
}

/// Generator output; may contain placeholders or leaked values.
#[derive(Debug, Clone)]
pub struct RawNarrative {
    report_id: String,
    text: String,
    warnings: Vec<NarrativeWarning>,
}

impl RawNarrative {
    pub fn stage(&self) -> NarrativeStage {
        NarrativeStage::RawNarrativeReceived
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn check(self, guard: &LeakageGuard, values: &[SensitiveValue]) -> CheckedNarrative {
        let report = guard.inspect(&self.report_id, &self.text, values);
        let mut warnings = self.warnings;
        if report.leaked() {
            warnings.push(NarrativeWarning::LeakageDetected {
                keys: report.leaked_keys.clone(),
                residual: report.residual,
            });
        }
        CheckedNarrative {
            report_id: self.report_id,
            template: report.text,
            document: None,
            warnings,
        }
    }
}

/// Placeholder-bearing narrative that passed the leakage guard.
#[derive(Debug, Clone)]
pub struct CheckedNarrative {
    report_id: String,
    template: String,
    document: Option<String>,
    warnings: Vec<NarrativeWarning>,
}

impl CheckedNarrative {
    pub fn stage(&self) -> NarrativeStage {
        NarrativeStage::LeakageChecked
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Attach a rendered document (still placeholder-bearing) that embeds
    /// this narrative. It is stitched and validated alongside it.
    pub fn with_document(mut self, document: String) -> Self {
        self.document = Some(document);
        self
    }

    pub fn stitch(self, pii: &PiiMap) -> StitchedNarrative {
        let narrative = decode(&self.template, pii);
        let document = self.document.as_deref().map(|d| decode(d, pii));

        let mut warnings = self.warnings;
        let mut missing = narrative.missing_keys.clone();
        if let Some(doc) = &document {
            missing.extend(doc.missing_keys.iter().copied());
        }
        missing.sort();
        missing.dedup();
        for key in missing {
            tracing::warn!(report_id = %self.report_id, key = %key, "No value for placeholder");
            warnings.push(NarrativeWarning::MissingPiiKey { key });
        }

        StitchedNarrative {
            report_id: self.report_id,
            template: self.template,
            narrative: narrative.text,
            document: document.map(|d| d.text),
            warnings,
        }
    }
}

/// Real values injected; not yet re-validated.
#[derive(Debug, Clone)]
pub struct StitchedNarrative {
    report_id: String,
    template: String,
    narrative: String,
    document: Option<String>,
    warnings: Vec<NarrativeWarning>,
}

impl StitchedNarrative {
    pub fn stage(&self) -> NarrativeStage {
        NarrativeStage::Stitched
    }

    /// Re-validate. Surviving tokens become `[NAME UNRESOLVED]` and are
    /// reported; stray single braces in the placeholder-bearing narrative
    /// are reported and left in place.
    pub fn finalize(self) -> PersistableNarrative {
        let mut warnings = self.warnings;
        let mut unresolved = Vec::new();

        let narrative = resolve_leftovers(&self.narrative, &mut unresolved);
        let document = self
            .document
            .as_deref()
            .map(|d| resolve_leftovers(d, &mut unresolved));

        // Checked on the generator's text, before real values went in.
        let stray_braces = !validate_placeholders(&self.template);

        unresolved.sort();
        unresolved.dedup();
        if !unresolved.is_empty() || stray_braces {
            tracing::warn!(
                report_id = %self.report_id,
                unresolved = ?unresolved,
                stray_braces,
                "Placeholder vocabulary drift in stitched narrative"
            );
            warnings.push(NarrativeWarning::MalformedVocabulary {
                unresolved,
                stray_braces,
            });
        }

        PersistableNarrative {
            document: document.unwrap_or_else(|| narrative.clone()),
            narrative,
            template: self.template,
            warnings,
        }
    }
}

fn resolve_leftovers(text: &str, unresolved: &mut Vec<String>) -> String {
    let mut out = text.to_string();
    for token in find_unresolved(text) {
        let replacement = format!("[{} UNRESOLVED]", token_name(&token));
        out = out.replace(&token, &replacement);
        unresolved.push(token);
    }
    out
}

/// Final text, free of placeholder markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistableNarrative {
    pub narrative: String,
    /// Attached document, stitched; the narrative itself when none was attached.
    pub document: String,
    /// Placeholder-bearing narrative after the leakage rewrite.
    pub template: String,
    pub warnings: Vec<NarrativeWarning>,
}

impl PersistableNarrative {
    pub fn stage(&self) -> NarrativeStage {
        NarrativeStage::Persistable
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pipeline::audit::MemoryAuditLog;
    use crate::pipeline::placeholder::PlaceholderKey;

    fn pii() -> PiiMap {
        PiiMap::new()
            .with(PlaceholderKey::CustomerName, "Jane Doe")
            .with(PlaceholderKey::AccountNumber, "ACC-991")
            .with(PlaceholderKey::CustomerId, "CUST-1")
            .with(PlaceholderKey::Country, "India")
            .with(PlaceholderKey::CaseId, "CASE-7")
    }

    fn values(map: &PiiMap) -> Vec<SensitiveValue> {
        map.iter()
            .map(|(key, value)| SensitiveValue {
                key: Some(key),
                value: value.to_string(),
            })
            .collect()
    }

    fn run(raw: &str, map: &PiiMap) -> PersistableNarrative {
        let guard = LeakageGuard::new(Arc::new(MemoryAuditLog::new()));
        PendingNarrative::new("SAR-TEST")
            .receive(raw.to_string())
            .unwrap()
            .check(&guard, &values(map))
            .stitch(map)
            .finalize()
    }

    #[test]
    fn stitch_is_idempotent() {
        let text = "{{CUSTOMER_NAME}} ({{CUSTOMER_ID}}) holds {ACCOUNT_NUMBER} in {{COUNTRY}}.";
        let once = stitch(text, &pii());
        assert_eq!(stitch(&once, &pii()), once);
        assert_eq!(once, "Jane Doe (CUST-1) holds ACC-991 in India.");
    }

    #[test]
    fn fallback_sentence_stitches_cleanly() {
        let map = PiiMap::new().with(PlaceholderKey::CustomerName, "Jane Doe");
        let out = run(
            "No suspicious activity identified for {{CUSTOMER_NAME}} during the review period.",
            &map,
        );
        assert_eq!(
            out.narrative,
            "No suspicious activity identified for Jane Doe during the review period."
        );
        assert!(out.warnings.is_empty());
        assert!(find_unresolved(&out.narrative).is_empty());
        assert_eq!(out.stage(), NarrativeStage::Persistable);
    }

    #[test]
    fn complete_map_leaves_no_tokens() {
        let text: String = PlaceholderKey::all()
            .iter()
            .map(|k| format!("{} and {}. ", k.token(), k.single_brace_token()))
            .collect();
        let out = run(&text, &pii());
        assert!(find_unresolved(&out.narrative).is_empty());
        assert!(!out.narrative.contains("{{"));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn missing_case_id_uses_sentinel_and_warns() {
        let map = pii().without(PlaceholderKey::CaseId);
        let out = run("Case {{CASE_ID}} was opened.", &map);
        assert_eq!(out.narrative, "Case [CASE_ID MISSING] was opened.");
        assert_eq!(
            out.warnings,
            vec![NarrativeWarning::MissingPiiKey { key: PlaceholderKey::CaseId }]
        );
    }

    #[test]
    fn unknown_token_is_resolved_to_marker_and_reported() {
        let out = run("Paid {{MERCHANT_NAME}} twice.", &pii());
        assert_eq!(out.narrative, "Paid [MERCHANT_NAME UNRESOLVED] twice.");
        assert_eq!(
            out.warnings,
            vec![NarrativeWarning::MalformedVocabulary {
                unresolved: vec!["{{MERCHANT_NAME}}".into()],
                stray_braces: false,
            }]
        );
    }

    #[test]
    fn stray_brace_is_reported_not_corrected() {
        let out = run("Funds moved { twice.", &pii());
        assert_eq!(out.narrative, "Funds moved { twice.");
        assert!(matches!(
            out.warnings.as_slice(),
            [NarrativeWarning::MalformedVocabulary { stray_braces: true, .. }]
        ));
    }

    #[test]
    fn braces_in_real_values_are_not_drift() {
        let map = pii().with(PlaceholderKey::CustomerName, "Acme {Holdings}");
        let out = run("{{CUSTOMER_NAME}} wired funds.", &map);
        assert_eq!(out.narrative, "Acme {Holdings} wired funds.");
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn braces_in_attached_document_are_not_drift() {
        let guard = LeakageGuard::new(Arc::new(MemoryAuditLog::new()));
        let checked = PendingNarrative::new("SAR-1")
            .receive("{{CUSTOMER_NAME}} wired funds.".into())
            .unwrap()
            .check(&guard, &values(&pii()));
        let doc = format!("Suspected typology: layering {{ring}}\n{}", checked.template());
        let out = checked.with_document(doc).stitch(&pii()).finalize();
        assert!(out.document.contains("layering {ring}"));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn leaked_value_is_patched_before_stitching() {
        let out = run("Jane Doe moved funds for {{CASE_ID}}.", &pii());
        assert_eq!(out.template, "{{CUSTOMER_NAME}} moved funds for {{CASE_ID}}.");
        assert_eq!(out.narrative, "Jane Doe moved funds for CASE-7.");
        assert_eq!(
            out.warnings,
            vec![NarrativeWarning::LeakageDetected {
                keys: vec![PlaceholderKey::CustomerName],
                residual: false,
            }]
        );
    }

    #[test]
    fn empty_narrative_is_terminal() {
        let err = PendingNarrative::new("SAR-1").receive("  \n".into()).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyNarrative));
    }

    #[test]
    fn truncated_narrative_is_flagged() {
        let out = run("{{CUSTOMER_NAME}} then transferred the", &pii());
        assert!(out.warnings.contains(&NarrativeWarning::PossiblyTruncated));
    }

    #[test]
    fn attached_document_is_stitched_and_validated() {
        let guard = LeakageGuard::new(Arc::new(MemoryAuditLog::new()));
        let checked = PendingNarrative::new("SAR-1")
            .receive("{{CUSTOMER_NAME}} wired funds.".into())
            .unwrap()
            .check(&guard, &values(&pii()));
        let doc = format!("Subject {{{{CUSTOMER_ID}}}}\n{}\nRef {{{{BRANCH}}}}", checked.template());
        let out = checked.with_document(doc).stitch(&pii()).finalize();
        assert_eq!(out.narrative, "Jane Doe wired funds.");
        assert_eq!(out.document, "Subject CUST-1\nJane Doe wired funds.\nRef [BRANCH UNRESOLVED]");
        assert!(matches!(
            out.warnings.as_slice(),
            [NarrativeWarning::MalformedVocabulary { unresolved, .. }] if unresolved == &vec!["{{BRANCH}}".to_string()]
        ));
    }

    #[test]
    fn stages_advance_in_order() {
        let guard = LeakageGuard::new(Arc::new(MemoryAuditLog::new()));
        let pending = PendingNarrative::new("SAR-1");
        assert_eq!(pending.stage(), NarrativeStage::AnonymizedPromptSent);
        let raw = pending.receive("Done.".into()).unwrap();
        assert_eq!(raw.stage(), NarrativeStage::RawNarrativeReceived);
        let checked = raw.check(&guard, &[]);
        assert_eq!(checked.stage(), NarrativeStage::LeakageChecked);
        let stitched = checked.stitch(&pii());
        assert_eq!(stitched.stage(), NarrativeStage::Stitched);
        assert_eq!(stitched.finalize().stage(), NarrativeStage::Persistable);
    }
}
