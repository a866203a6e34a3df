//! Post-generation PII leakage scan with corrective rewrite.
//!
//! Exact matching on identifier boundaries only, ignoring case for all but
//! very short values. A value embedded in a longer word or inside a
//! placeholder token is not a leak.
//! A clean scan does not rule out paraphrased disclosure.

use std::ops::Range;
use std::sync::Arc;

use regex::RegexBuilder;

use super::audit::{AuditAction, AuditEvent, AuditSink};
use super::placeholder::{token_spans, PiiMap, PlaceholderKey};
use crate::models::GenerateRequest;

/// Replacement for identifiers with no placeholder of their own.
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Values this short (country codes like `US`, `IN`) match case-sensitively;
/// ignoring case would hit the words "us" and "in".
pub const EXACT_CASE_MAX_CHARS: usize = 3;

/// A real value that must not appear in generator input or output.
#[derive(Clone, PartialEq, Eq)]
pub struct SensitiveValue {
    /// Token the value is rewritten to. `None` rewrites to [`REDACTED_MARKER`].
    pub key: Option<PlaceholderKey>,
    pub value: String,
}

impl SensitiveValue {
    pub fn replacement(&self) -> String {
        match self.key {
            Some(key) => key.token(),
            None => REDACTED_MARKER.to_string(),
        }
    }
}

impl std::fmt::Debug for SensitiveValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveValue")
            .field("key", &self.key)
            .field("len", &self.value.chars().count())
            .finish()
    }
}

/// Every identifier for a case: the map values, the customer email and
/// transaction account numbers other than the customer's own.
pub fn sensitive_values(pii: &PiiMap, request: &GenerateRequest) -> Vec<SensitiveValue> {
    let mut values: Vec<SensitiveValue> = pii
        .iter()
        .map(|(key, value)| SensitiveValue {
            key: Some(key),
            value: value.to_string(),
        })
        .collect();

    let mut extra: Vec<&str> = Vec::new();
    if let Some(email) = request.customer.email.as_deref() {
        extra.push(email);
    }
    for txn in &request.transactions {
        extra.push(&txn.sender_account);
        extra.push(&txn.receiver_account);
    }

    for raw in extra {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        let lower = value.to_lowercase();
        if values.iter().any(|v| v.value.to_lowercase() == lower) {
            continue;
        }
        values.push(SensitiveValue {
            key: None,
            value: value.to_string(),
        });
    }
    values
}

/// One accepted occurrence of a sensitive value.
struct ValueMatch<'v> {
    range: Range<usize>,
    value: &'v SensitiveValue,
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Neither neighbour of `range` continues an identifier.
fn on_boundary(text: &str, range: &Range<usize>) -> bool {
    let before = text[..range.start].chars().next_back();
    let after = text[range.end..].chars().next();
    !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Whole-identifier, case-insensitive occurrences outside placeholder
/// tokens. Longer values claim text first, so a value nested in a longer
/// one is not reported twice. Sorted by position.
fn find_values<'v>(text: &str, values: &'v [SensitiveValue]) -> Vec<ValueMatch<'v>> {
    let mut ordered: Vec<&SensitiveValue> =
        values.iter().filter(|v| !v.value.trim().is_empty()).collect();
    ordered.sort_by(|a, b| b.value.len().cmp(&a.value.len()));

    let mut claimed = token_spans(text);
    let mut found: Vec<ValueMatch<'v>> = Vec::new();

    for value in ordered {
        let re = match RegexBuilder::new(&regex::escape(&value.value))
            .case_insensitive(value.value.chars().count() > EXACT_CASE_MAX_CHARS)
            .build()
        {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(key = ?value.key, error = %e, "Sensitive value pattern rejected");
                continue;
            }
        };

        let mut pos = 0;
        while let Some(m) = re.find_at(text, pos) {
            let range = m.range();
            let accepted = on_boundary(text, &range) && !claimed.iter().any(|c| overlaps(c, &range));
            if accepted {
                pos = range.end;
                claimed.push(range.clone());
                found.push(ValueMatch { range, value });
            } else {
                // Retry one character later; a rejected hit may hide a valid one.
                pos = range.start + text[range.start..].chars().next().map_or(1, char::len_utf8);
            }
            if pos >= text.len() {
                break;
            }
        }
    }

    found.sort_by_key(|m| m.range.start);
    found
}

/// Values that appear as whole identifiers in `text`.
/// Text inside placeholder tokens is not searched.
pub fn leaked_values<'a>(text: &str, values: &'a [SensitiveValue]) -> Vec<&'a SensitiveValue> {
    let mut leaked: Vec<&'a SensitiveValue> = Vec::new();
    for m in find_values(text, values) {
        if !leaked.iter().any(|v| std::ptr::eq(*v, m.value)) {
            leaked.push(m.value);
        }
    }
    leaked
}

/// `true` if any value appears as a whole identifier in `text`.
pub fn check_leakage(text: &str, values: &[SensitiveValue]) -> bool {
    !find_values(text, values).is_empty()
}

/// Rewrite every occurrence found by [`leaked_values`] to its replacement.
/// Existing tokens and inserted replacements are never rewritten.
pub fn redact_values(text: &str, values: &[SensitiveValue]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in find_values(text, values) {
        out.push_str(&text[last..m.range.start]);
        out.push_str(&m.value.replacement());
        last = m.range.end;
    }
    out.push_str(&text[last..]);
    out
}

/// Outcome of one leakage inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakageReport {
    /// Text after corrective rewrite (unchanged when nothing leaked).
    pub text: String,
    /// Placeholder keys whose real values were found.
    pub leaked_keys: Vec<PlaceholderKey>,
    /// Identifiers without a placeholder that were found.
    pub other_identifiers: usize,
    /// A value was still present after the rewrite.
    pub residual: bool,
}

impl LeakageReport {
    pub fn leaked(&self) -> bool {
        !self.leaked_keys.is_empty() || self.other_identifiers > 0
    }
}

/// Runs once per narrative, between generation and stitching.
pub struct LeakageGuard {
    audit: Arc<dyn AuditSink>,
}

impl LeakageGuard {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    pub fn inspect(&self, report_id: &str, text: &str, values: &[SensitiveValue]) -> LeakageReport {
        let found = leaked_values(text, values);
        if found.is_empty() {
            return LeakageReport {
                text: text.to_string(),
                leaked_keys: Vec::new(),
                other_identifiers: 0,
                residual: false,
            };
        }

        let mut leaked_keys: Vec<PlaceholderKey> = found.iter().filter_map(|v| v.key).collect();
        leaked_keys.sort();
        leaked_keys.dedup();
        let other_identifiers = found.iter().filter(|v| v.key.is_none()).count();

        let corrected = redact_values(text, values);
        let residual = check_leakage(&corrected, values);

        tracing::warn!(
            report_id = %report_id,
            keys = ?leaked_keys,
            other_identifiers,
            residual,
            "PII leakage detected in generated narrative"
        );
        self.audit.append(AuditEvent::new(
            AuditAction::PiiLeakageDetected,
            report_id,
            serde_json::json!({
                "keys": leaked_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "other_identifiers": other_identifiers,
                "residual": residual,
            }),
        ));

        LeakageReport {
            text: corrected,
            leaked_keys,
            other_identifiers,
            residual,
        }
    }
}
