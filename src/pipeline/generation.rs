//! Single-case generation pipeline.
//!
//! analyze → prompt → generate → sanitize → leakage guard → render → stitch.
//! All collaborators are injected; nothing here is process-global and no
//! state is shared between requests apart from the append-only audit sink.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::analysis::RuleAnalyzer;
use super::audit::{AuditAction, AuditEvent, AuditSink};
use super::leakage::{leaked_values, sensitive_values, LeakageGuard};
use super::llm::{LlmError, NarrativeGenerator};
use super::output_sanitize::sanitize_llm_output;
use super::placeholder::{PiiMap, PlaceholderKey};
use super::prompt::PromptBuilder;
use super::report::{analysis_section, render_report, ReportContext};
use super::stitcher::PendingNarrative;
use super::GenerationError;
use crate::config::Settings;
use crate::models::{GenerateRequest, ReportSections, ReportStatus, SarResponse};

/// Coarse progress checkpoints reported to the caller.
pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_GENERATING: u8 = 30;
pub const PROGRESS_FINALIZING: u8 = 90;

/// Receives stage-boundary progress for polling clients.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

const RUN_ACTIVE: u8 = 0;
const RUN_CANCELLED: u8 = 1;
const RUN_FINISHED: u8 = 2;

/// Shared between one pipeline run and whoever waits on it.
///
/// Exactly one side settles the outcome: the pipeline by finishing, or the
/// waiter by cancelling. Only the winner writes the terminal audit record.
#[derive(Debug)]
pub struct RunControl {
    report_id: String,
    state: AtomicU8,
}

impl RunControl {
    pub fn new(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            state: AtomicU8::new(RUN_ACTIVE),
        }
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    /// `true` if the run had not finished yet and is now cancelled.
    pub fn cancel(&self) -> bool {
        self.settle(RUN_CANCELLED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUN_CANCELLED
    }

    fn finish(&self) -> bool {
        self.settle(RUN_FINISHED)
    }

    fn settle(&self, outcome: u8) -> bool {
        self.state
            .compare_exchange(RUN_ACTIVE, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct GenerationService {
    generator: Arc<dyn NarrativeGenerator>,
    audit: Arc<dyn AuditSink>,
    guard: LeakageGuard,
    prompt_builder: PromptBuilder,
    settings: Settings,
}

impl GenerationService {
    pub fn new(
        generator: Arc<dyn NarrativeGenerator>,
        audit: Arc<dyn AuditSink>,
        settings: Settings,
    ) -> Self {
        Self {
            guard: LeakageGuard::new(Arc::clone(&audit)),
            prompt_builder: PromptBuilder::new(settings.transaction_sample),
            generator,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fresh report id with the prefix of the request's region.
    pub fn assign_report_id(&self, request: &GenerateRequest) -> String {
        let region = request.region_or(self.settings.default_region);
        new_report_id(region.profile().report_id_prefix)
    }

    /// Run the whole pipeline for one case. Blocks for the duration of the
    /// generator call.
    pub fn generate(
        &self,
        request: &GenerateRequest,
        progress: &dyn ProgressSink,
    ) -> Result<SarResponse, GenerationError> {
        let control = RunControl::new(self.assign_report_id(request));
        self.generate_with(request, progress, &control)
    }

    /// As [`Self::generate`], under an external [`RunControl`]. Once the
    /// control is cancelled the run stops at the next checkpoint and writes
    /// no terminal audit record.
    pub fn generate_with(
        &self,
        request: &GenerateRequest,
        progress: &dyn ProgressSink,
        control: &RunControl,
    ) -> Result<SarResponse, GenerationError> {
        if control.is_cancelled() {
            return Err(cancelled());
        }
        progress.report(PROGRESS_STARTED, "Initializing generation");

        let region = request.region_or(self.settings.default_region);
        let profile = region.profile();
        let report_id = control.report_id().to_string();
        let case_id = request
            .case_id
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&report_id)
            .to_string();

        let pii = PiiMap::from_request(request, &case_id);
        let values = sensitive_values(&pii, request);

        let analyzer = RuleAnalyzer::new(self.settings.thresholds_for(region));
        let findings = analyzer.analyze(&request.transactions);
        let prompt = self
            .prompt_builder
            .build(request, &findings, &values, &profile);

        // The system prompt is fixed text; only the user prompt carries case data.
        let prompt_leaks = leaked_values(&prompt.user, &values);
        if !prompt_leaks.is_empty() {
            let mut keys: Vec<PlaceholderKey> = prompt_leaks.iter().filter_map(|v| v.key).collect();
            keys.sort();
            keys.dedup();
            return Err(self.fail(control, GenerationError::PromptLeak(keys)));
        }

        tracing::info!(
            report_id = %report_id,
            region = %region,
            txn_count = findings.txn_count,
            findings = findings.finding_count(),
            alerts = request.alerts.len(),
            "Anonymized prompt ready"
        );

        progress.report(PROGRESS_GENERATING, "Generating narrative");
        let pending = PendingNarrative::new(&report_id);
        let generated = self.generator.generate(&prompt.user, &prompt.system);
        if control.is_cancelled() {
            tracing::warn!(report_id = %report_id, "Discarding narrative for cancelled run");
            return Err(cancelled());
        }
        let raw_text = generated.map_err(|e| self.fail(control, e.into()))?;

        progress.report(PROGRESS_FINALIZING, "Finalizing report");
        let raw = pending
            .receive(sanitize_llm_output(&raw_text))
            .map_err(|e| self.fail(control, e))?;
        let checked = raw.check(&self.guard, &values);

        let generated_at = Utc::now();
        let document = render_report(
            checked.template(),
            &ReportContext {
                report_id: &report_id,
                generated_at,
                region: &profile,
                findings: &findings,
                typology: request.typology.as_deref(),
            },
        );
        let persistable = checked.with_document(document).stitch(&pii).finalize();

        if !control.finish() {
            tracing::warn!(report_id = %report_id, "Discarding report for cancelled run");
            return Err(cancelled());
        }
        self.audit.append(AuditEvent::new(
            AuditAction::SarGenerated,
            &report_id,
            serde_json::json!({
                "region": region.as_str(),
                "findings": findings.finding_count(),
                "warnings": persistable.warnings.iter().map(|w| w.as_str()).collect::<Vec<_>>(),
            }),
        ));
        tracing::info!(
            report_id = %report_id,
            warnings = persistable.warnings.len(),
            "Report generated"
        );

        Ok(SarResponse {
            report_id,
            content: persistable.document,
            sections: ReportSections {
                narrative: persistable.narrative,
                narrative_template: persistable.template,
                automated_analysis: analysis_section(&findings),
            },
            generated_at,
            status: ReportStatus::Generated,
            warnings: persistable.warnings,
        })
    }

    /// Cancel `control` because its deadline passed, and record the failure
    /// unless the run already finished.
    pub fn cancel_on_timeout(&self, control: &RunControl, timeout: Duration) -> Option<GenerationError> {
        if !control.cancel() {
            return None;
        }
        let error = GenerationError::GenerationUnavailable(LlmError::Timeout(timeout));
        self.record_failure(control.report_id(), &error);
        Some(error)
    }

    fn fail(&self, control: &RunControl, error: GenerationError) -> GenerationError {
        if control.finish() {
            self.record_failure(control.report_id(), &error);
            error
        } else {
            cancelled()
        }
    }

    fn record_failure(&self, report_id: &str, error: &GenerationError) {
        tracing::error!(report_id = %report_id, error = %error, "Generation failed");
        self.audit.append(AuditEvent::new(
            AuditAction::GenerationFailed,
            report_id,
            serde_json::json!({ "error": failure_kind(error) }),
        ));
    }
}

fn cancelled() -> GenerationError {
    GenerationError::Aborted("run cancelled".into())
}

/// Error category for the audit trail; messages may echo upstream bodies.
fn failure_kind(error: &GenerationError) -> &'static str {
    match error {
        GenerationError::GenerationUnavailable(LlmError::Timeout(_)) => "timeout",
        GenerationError::GenerationUnavailable(_) => "generation_unavailable",
        GenerationError::EmptyNarrative => "empty_narrative",
        GenerationError::PromptLeak(_) => "prompt_leak",
        GenerationError::Aborted(_) => "aborted",
    }
}

/// e.g. `SAR-1A2B3C4D`
fn new_report_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}-{}", &hex[..8])
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::fixtures;
    use crate::pipeline::audit::MemoryAuditLog;
    use crate::pipeline::leakage::check_leakage;
    use crate::pipeline::placeholder::find_unresolved;
    use crate::config::Region;
    use crate::pipeline::prompt::{FALLBACK_NARRATIVE, SYSTEM_PROMPT};
    use crate::pipeline::NarrativeWarning;

    fn service(generator: Arc<dyn NarrativeGenerator>) -> (GenerationService, Arc<MemoryAuditLog>) {
        let log = Arc::new(MemoryAuditLog::new());
        (
            GenerationService::new(generator, log.clone(), Settings::default()),
            log,
        )
    }

    fn salary_case() -> GenerateRequest {
        let mut txn = fixtures::transaction("T1", 9200.0, 10);
        txn.currency = "INR".into();
        txn.description = Some("salary".into());
        fixtures::request(vec![txn], vec![])
    }

    #[test]
    fn no_alert_case_end_to_end() {
        let stub = Arc::new(StubGenerator::new(FALLBACK_NARRATIVE));
        let (svc, log) = service(stub.clone());
        let progress = RecordingProgress::default();

        let sar = svc.generate(&salary_case(), &progress).unwrap();

        assert_eq!(
            sar.sections.narrative,
            "No suspicious activity identified for Jane Doe during the review period."
        );
        assert_eq!(sar.sections.narrative_template, FALLBACK_NARRATIVE);
        assert!(find_unresolved(&sar.content).is_empty());
        assert!(find_unresolved(&sar.sections.narrative).is_empty());
        assert_eq!(sar.status, ReportStatus::Generated);
        assert!(sar.warnings.is_empty(), "{:?}", sar.warnings);
        assert!(sar.report_id.starts_with("SAR-"));
        assert!(sar.sections.automated_analysis.contains("Structuring [T1]"));
        assert!(!sar.sections.automated_analysis.contains("Rapid Movement"));

        let calls = stub.calls.lock().unwrap();
        let (user, system) = &calls[0];
        assert!(user.contains(FALLBACK_NARRATIVE));
        assert!(system.contains(FALLBACK_NARRATIVE));

        assert_eq!(*progress.steps.lock().unwrap(), vec![10, 30, 90]);
        assert_eq!(log.records().last().unwrap().action, AuditAction::SarGenerated);
    }

    #[test]
    fn generator_never_sees_real_values() {
        let stub = Arc::new(StubGenerator::new("{{CUSTOMER_NAME}} moved funds for {{CASE_ID}}."));
        let (svc, _) = service(stub.clone());
        let req = fixtures::request(
            vec![
                fixtures::transaction("T1", 9500.0, 1),
                fixtures::transaction("T2", 6000.0, 2),
            ],
            vec![fixtures::alert("Rapid Cash Out")],
        );
        let sar = svc.generate(&req, &NoopProgress).unwrap();

        let pii = PiiMap::from_request(&req, "CASE-2024-0117");
        let values = sensitive_values(&pii, &req);
        let calls = stub.calls.lock().unwrap();
        assert!(!check_leakage(&calls[0].0, &values));
        assert!(!check_leakage(&calls[0].1, &values));

        assert_eq!(sar.sections.narrative, "Jane Doe moved funds for CASE-2024-0117.");
        assert!(sar.content.contains("Name: Jane Doe"));
        assert!(sar.content.contains("Account Number: IN-0042-9931"));
        assert!(sar.content.contains("Case Reference: CASE-2024-0117"));
    }

    #[test]
    fn leaked_name_is_patched_and_flagged() {
        let stub = Arc::new(StubGenerator::new("Jane Doe structured deposits."));
        let (svc, log) = service(stub);
        let req = fixtures::request(vec![fixtures::transaction("T1", 9500.0, 1)], vec![]);
        let sar = svc.generate(&req, &NoopProgress).unwrap();

        assert_eq!(sar.sections.narrative_template, "{{CUSTOMER_NAME}} structured deposits.");
        assert_eq!(sar.sections.narrative, "Jane Doe structured deposits.");
        assert!(sar.needs_attention());
        assert!(matches!(
            sar.warnings.as_slice(),
            [NarrativeWarning::LeakageDetected { residual: false, .. }]
        ));
        let actions: Vec<_> = log.records().iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AuditAction::PiiLeakageDetected, AuditAction::SarGenerated]);
    }

    #[test]
    fn generator_failure_is_terminal() {
        let (svc, log) = service(Arc::new(FailingGenerator));
        let progress = RecordingProgress::default();
        let err = svc.generate(&salary_case(), &progress).unwrap_err();

        assert!(matches!(err, GenerationError::GenerationUnavailable(_)));
        assert_eq!(*progress.steps.lock().unwrap(), vec![10, 30]);
        assert_eq!(log.records()[0].action, AuditAction::GenerationFailed);
    }

    #[test]
    fn empty_generator_output_is_terminal() {
        let (svc, _) = service(Arc::new(StubGenerator::new("<think>hmm</think>  ")));
        let err = svc.generate(&salary_case(), &NoopProgress).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyNarrative));
    }

    #[test]
    fn missing_case_id_falls_back_to_report_id() {
        let stub = Arc::new(StubGenerator::new("Opened as {{CASE_ID}}."));
        let (svc, _) = service(stub);
        let mut req = salary_case();
        req.case_id = None;
        let sar = svc.generate(&req, &NoopProgress).unwrap();
        assert_eq!(sar.sections.narrative, format!("Opened as {}.", sar.report_id));
    }

    #[test]
    fn missing_country_gets_sentinel() {
        let stub = Arc::new(StubGenerator::new("Resident of {{COUNTRY}}."));
        let (svc, _) = service(stub);
        let mut req = salary_case();
        req.customer.country = None;
        let sar = svc.generate(&req, &NoopProgress).unwrap();
        assert_eq!(sar.sections.narrative, "Resident of [COUNTRY MISSING].");
        assert_eq!(
            sar.warnings,
            vec![NarrativeWarning::MissingPiiKey { key: PlaceholderKey::Country }]
        );
    }

    #[test]
    fn india_region_uses_str_prefix() {
        let (svc, _) = service(Arc::new(StubGenerator::new("Reviewed {{CUSTOMER_ID}}.")));
        let mut req = salary_case();
        req.region = "IND".into();
        let sar = svc.generate(&req, &NoopProgress).unwrap();
        assert!(sar.report_id.starts_with("STR-"));
        assert!(sar.content.starts_with("SUSPICIOUS TRANSACTION REPORT (STR)"));
        assert_eq!(sar.sections.narrative, "Reviewed CUST-7781.");
    }

    #[test]
    fn short_country_codes_keep_prompt_and_narrative_intact() {
        for code in ["US", "IN"] {
            let stub = Arc::new(StubGenerator::new(
                "The suspicious status of {{CUSTOMER_NAME}} was reviewed in {{COUNTRY}}.",
            ));
            let (svc, _) = service(stub.clone());
            let mut req = fixtures::request(
                vec![fixtures::transaction("T1", 9500.0, 1)],
                vec![fixtures::alert("Cash Structuring")],
            );
            req.customer.country = Some(code.into());

            let sar = svc.generate(&req, &NoopProgress).unwrap();

            assert_eq!(
                sar.sections.narrative,
                format!("The suspicious status of Jane Doe was reviewed in {code}.")
            );
            assert!(sar.warnings.is_empty(), "{code}: {:?}", sar.warnings);

            let calls = stub.calls.lock().unwrap();
            let (user, system) = &calls[0];
            assert_eq!(system, SYSTEM_PROMPT.trim());
            assert!(user.contains("Draft the Suspicious Activity Report narrative"), "{user}");
            assert!(user.contains("- Subject: {{CUSTOMER_NAME}}"));
            assert!(!user.contains("{{COUNTRY}}"), "{user}");
        }
    }

    #[test]
    fn unknown_region_uses_configured_default() {
        let log = Arc::new(MemoryAuditLog::new());
        let settings = Settings {
            default_region: Region::India,
            ..Settings::default()
        };
        let svc = GenerationService::new(Arc::new(StubGenerator::new("Reviewed.")), log, settings);
        let mut req = salary_case();
        req.region = "XX".into();
        let sar = svc.generate(&req, &NoopProgress).unwrap();
        assert!(sar.report_id.starts_with("STR-"), "{}", sar.report_id);
        assert!(sar.content.contains("FIU-IND"));
    }

    #[test]
    fn cancelled_run_stops_without_terminal_record() {
        let stub = Arc::new(StubGenerator::new("Reviewed."));
        let (svc, log) = service(stub.clone());
        let control = RunControl::new("SAR-CANCELLED");
        assert!(control.cancel());

        let err = svc.generate_with(&salary_case(), &NoopProgress, &control).unwrap_err();

        assert!(matches!(err, GenerationError::Aborted(_)));
        assert!(stub.calls.lock().unwrap().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn timeout_cancel_records_failure_once() {
        let (svc, log) = service(Arc::new(StubGenerator::new("Reviewed.")));
        let control = RunControl::new("SAR-LATE");

        let err = svc.cancel_on_timeout(&control, Duration::from_millis(50)).unwrap();
        assert!(matches!(err, GenerationError::GenerationUnavailable(LlmError::Timeout(_))));
        assert!(svc.cancel_on_timeout(&control, Duration::from_millis(50)).is_none());

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::GenerationFailed);
        assert_eq!(records[0].report_id, "SAR-LATE");
        let expected = AuditEvent::new(
            AuditAction::GenerationFailed,
            "SAR-LATE",
            serde_json::json!({ "error": "timeout" }),
        );
        assert_eq!(records[0].data_hash, expected.data_hash());
    }

    #[test]
    fn finished_run_cannot_be_cancelled() {
        let (svc, log) = service(Arc::new(StubGenerator::new("Reviewed.")));
        let control = RunControl::new("SAR-DONE");
        let sar = svc.generate_with(&salary_case(), &NoopProgress, &control).unwrap();

        assert_eq!(sar.report_id, "SAR-DONE");
        assert!(svc.cancel_on_timeout(&control, Duration::from_secs(1)).is_none());
        let actions: Vec<_> = log.records().iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AuditAction::SarGenerated]);
    }

    #[test]
    fn report_ids_are_unique() {
        assert_ne!(new_report_id("SAR"), new_report_id("SAR"));
        assert_eq!(new_report_id("SAR").len(), 12);
    }
}
