//! Region-specific report layout.
//!
//! Rendering happens on the placeholder-bearing narrative. Subject fields
//! are written as tokens and resolved by the same stitching pass as the
//! narrative.

use chrono::{DateTime, Utc};

use super::analysis::AnalysisFindings;
use super::placeholder::PlaceholderKey;
use crate::config::RegionProfile;

/// `symbol` + amount with thousands separators and two decimals.
pub fn format_currency(amount: f64, symbol: &str) -> String {
    let negative = amount < 0.0;
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{symbol}{grouped}.{cents}", if negative { "-" } else { "" })
}

pub struct ReportContext<'a> {
    pub report_id: &'a str,
    pub generated_at: DateTime<Utc>,
    pub region: &'a RegionProfile,
    pub findings: &'a AnalysisFindings,
    pub typology: Option<&'a str>,
}

/// Compose the full report around a placeholder-bearing narrative.
pub fn render_report(narrative_template: &str, ctx: &ReportContext<'_>) -> String {
    let region = ctx.region;
    let findings = ctx.findings;
    let mut out = String::new();

    out.push_str(&format!("{}\n", region.report_name.to_uppercase()));
    out.push_str(&format!("Report ID: {}\n", ctx.report_id));
    out.push_str(&format!("Case Reference: {}\n", PlaceholderKey::CaseId.token()));
    out.push_str(&format!("Regulator: {}\n", region.regulator_name));
    out.push_str(&format!(
        "Date of Report: {}\n\n",
        ctx.generated_at.format(region.date_format)
    ));

    out.push_str("SUBJECT INFORMATION\n");
    out.push_str(&format!("Name: {}\n", PlaceholderKey::CustomerName.token()));
    out.push_str(&format!("Customer ID: {}\n", PlaceholderKey::CustomerId.token()));
    out.push_str(&format!("Account Number: {}\n\n", PlaceholderKey::AccountNumber.token()));

    out.push_str("SUMMARY OF ACTIVITY\n");
    out.push_str(&format!(
        "Transactions reviewed: {}\nTotal volume: {}\n",
        findings.txn_count,
        format_currency(findings.total_volume, region.currency_symbol)
    ));
    if let Some(typology) = ctx.typology.filter(|t| !t.trim().is_empty()) {
        out.push_str(&format!("Suspected typology: {}\n", typology.trim()));
    }
    out.push('\n');

    out.push_str("NARRATIVE\n");
    out.push_str(narrative_template.trim());
    out.push_str("\n\n");

    out.push_str("AUTOMATED ANALYSIS\n");
    out.push_str(&analysis_section(findings));
    out.push('\n');

    out.push_str("CONCLUSION\n");
    if findings.is_empty() {
        out.push_str("No rule-based indicators were triggered for this review period.\n");
    } else {
        out.push_str(&format!(
            "Rule-based indicators support referral of this case for filing with {}.\n",
            region.regulator_name
        ));
    }

    out
}

/// One line per finding, listing transaction references and the reason.
pub fn analysis_section(findings: &AnalysisFindings) -> String {
    let mut out = String::new();
    if findings.is_empty() {
        out.push_str("- No findings.\n");
        return out;
    }
    for finding in findings.structuring.iter().chain(findings.rapid_movement.iter()) {
        out.push_str(&format!(
            "- {} [{}]: {}\n",
            finding.kind.label(),
            finding.transaction_ids.join(", "),
            finding.reason
        ));
    }
    out
}
