//! Anonymized prompt construction.
//!
//! The generator only sees placeholder tokens for the subject and case.
//! The user prompt has had the case's real values rewritten to tokens,
//! whatever the input fields contained. The system prompt is fixed text
//! and is sent as written.

use serde::Serialize;

use super::analysis::AnalysisFindings;
use super::leakage::{redact_values, SensitiveValue};
use super::sanitize::sanitize_field;
use crate::config::{RegionProfile, DEFAULT_TRANSACTION_SAMPLE};
use crate::models::GenerateRequest;

/// Description shown for every sampled transaction.
pub const GENERIC_DESCRIPTION: &str = "Standard Transaction";

/// Exact narrative expected when nothing suspicious was found.
pub const FALLBACK_NARRATIVE: &str =
    "No suspicious activity identified for {{CUSTOMER_NAME}} during the review period.";

pub const SYSTEM_PROMPT: &str = r#"
You are an expert anti-money-laundering compliance analyst. Your ONLY role is
to draft the narrative section of a suspicious activity report from the case
facts you are given.

PRIVACY RULES (ABSOLUTE, NO EXCEPTIONS):
1. NEVER write a real name, account number, customer id, country or case id.
2. Refer to the subject and case ONLY with these placeholders, exactly as written:
   {{CUSTOMER_NAME}}, {{ACCOUNT_NUMBER}}, {{CUSTOMER_ID}}, {{COUNTRY}}, {{CASE_ID}}
3. Do not invent other placeholders and do not change their braces.
4. If the case has no findings, respond with exactly:
   No suspicious activity identified for {{CUSTOMER_NAME}} during the review period.

STYLE:
Plain paragraphs covering introduction, transaction analysis, suspicion details
and conclusion. No headers, no bullet lists, no markdown.
"#;

/// The two strings sent to the narrative generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativePrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    transaction_sample: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_SAMPLE)
    }
}

impl PromptBuilder {
    pub fn new(transaction_sample: usize) -> Self {
        Self { transaction_sample }
    }

    pub fn build(
        &self,
        request: &GenerateRequest,
        findings: &AnalysisFindings,
        values: &[SensitiveValue],
        region: &RegionProfile,
    ) -> NarrativePrompt {
        let user = self.user_prompt(request, findings, region);
        NarrativePrompt {
            system: SYSTEM_PROMPT.trim().to_string(),
            user: redact_values(&user, values),
        }
    }

    fn user_prompt(
        &self,
        request: &GenerateRequest,
        findings: &AnalysisFindings,
        region: &RegionProfile,
    ) -> String {
        let customer = &request.customer;
        let mut out = String::new();

        out.push_str(&format!(
            "Draft the {} narrative for filing with {}.\n\n",
            region.report_name, region.regulator_name
        ));

        out.push_str("CASE:\n");
        out.push_str("- Case reference: {{CASE_ID}}\n");
        out.push_str("- Subject: {{CUSTOMER_NAME}}\n");
        out.push_str(&format!("- Occupation: {}\n", sanitize_field(&customer.occupation)));
        out.push_str(&format!("- Risk rating: {}\n", sanitize_field(&customer.risk_rating)));
        out.push_str(&format!("- KYC status: {}\n", sanitize_field(&customer.kyc_status)));
        if let Some(typology) = request.typology.as_deref().map(sanitize_field) {
            if !typology.is_empty() {
                out.push_str(&format!("- Suspected typology: {typology}\n"));
            }
        }

        out.push_str(&format!(
            "\nTRANSACTIONS ({} total, volume {:.2}; showing up to {}):\n",
            findings.txn_count, findings.total_volume, self.transaction_sample
        ));
        for txn in request.transactions.iter().take(self.transaction_sample) {
            out.push_str(&format!(
                "- {:.2} {} on {} via {}: {}\n",
                txn.amount,
                sanitize_field(&txn.currency),
                txn.timestamp.format(region.date_format),
                sanitize_field(&txn.transaction_type),
                GENERIC_DESCRIPTION
            ));
        }

        out.push_str("\nTRIGGERED ALERTS:\n");
        if request.alerts.is_empty() {
            out.push_str("- none\n");
        }
        for alert in &request.alerts {
            out.push_str(&format!(
                "- {} (severity {})\n",
                sanitize_field(&alert.rule_name),
                alert.severity
            ));
        }

        out.push_str("\nRULE-BASED INDICATORS:\n");
        let summary = findings.summary();
        if summary.is_empty() {
            out.push_str("- none\n");
        }
        for line in summary {
            out.push_str(&format!("- {line}\n"));
        }

        out.push_str("\nTASK:\n");
        if request.alerts.is_empty() && findings.is_empty() {
            out.push_str(&format!(
                "No alerts were triggered and no indicators were found. Respond with exactly:\n{FALLBACK_NARRATIVE}\n"
            ));
        } else {
            out.push_str(
                "Write the narrative grounded strictly in the triggered alerts and rule-based \
                 indicators above. Do not speculate beyond them. Use only the placeholders \
                 listed in your instructions.\n",
            );
            if request.alerts.is_empty() {
                out.push_str(&format!(
                    "No alerts were triggered. If the indicators do not establish suspicious \
                     activity, respond with exactly:\n{FALLBACK_NARRATIVE}\n"
                ));
            }
        }

        out
    }
}
