//! Placeholder vocabulary and template substitution.
//!
//! The generator only ever sees `{{KEY}}` tokens from a fixed table. Decoding
//! is one pass over the text that prefers the double-brace form and accepts
//! the single-brace form at any position where no double token starts.
//! Substituted values are never rescanned, and values cannot carry tokens
//! of their own, so decoding is a no-op once no tokens remain.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::models::GenerateRequest;

/// The fixed placeholder vocabulary, in decode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaceholderKey {
    CustomerName,
    AccountNumber,
    CustomerId,
    Country,
    CaseId,
}

impl PlaceholderKey {
    pub fn all() -> &'static [PlaceholderKey] {
        &[
            Self::CustomerName,
            Self::AccountNumber,
            Self::CustomerId,
            Self::Country,
            Self::CaseId,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerName => "CUSTOMER_NAME",
            Self::AccountNumber => "ACCOUNT_NUMBER",
            Self::CustomerId => "CUSTOMER_ID",
            Self::Country => "COUNTRY",
            Self::CaseId => "CASE_ID",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.as_str() == name)
    }

    /// Canonical token, e.g. `{{CUSTOMER_NAME}}`.
    pub fn token(&self) -> String {
        format!("{{{{{}}}}}", self.as_str())
    }

    /// Drift form, e.g. `{CUSTOMER_NAME}`.
    pub fn single_brace_token(&self) -> String {
        format!("{{{}}}", self.as_str())
    }

    /// Inserted when the map has no value, e.g. `[CASE_ID MISSING]`.
    pub fn missing_sentinel(&self) -> String {
        format!("[{} MISSING]", self.as_str())
    }
}

impl fmt::Display for PlaceholderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// PII map
// ═══════════════════════════════════════════════════════════

/// Real values for one request. Lives only in the generation step.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PiiMap {
    values: BTreeMap<PlaceholderKey, String>,
}

impl PiiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map for a case. Blank fields are left absent.
    pub fn from_request(request: &GenerateRequest, case_id: &str) -> Self {
        let customer = &request.customer;
        let mut map = Self::new();
        map.insert(PlaceholderKey::CustomerName, &customer.name);
        map.insert(PlaceholderKey::AccountNumber, &customer.account_number);
        map.insert(PlaceholderKey::CustomerId, &customer.customer_id);
        if let Some(country) = &customer.country {
            map.insert(PlaceholderKey::Country, country);
        }
        map.insert(PlaceholderKey::CaseId, case_id);
        map
    }

    /// Set a value. Whitespace-only values are ignored. Known tokens inside
    /// the value are reduced to their bare names.
    pub fn insert(&mut self, key: PlaceholderKey, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.values.remove(&key);
        } else {
            self.values.insert(key, neutralize_tokens(key, value));
        }
    }

    pub fn with(mut self, key: PlaceholderKey, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn without(mut self, key: PlaceholderKey) -> Self {
        self.values.remove(&key);
        self
    }

    pub fn get(&self, key: PlaceholderKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Entries in decode order.
    pub fn iter(&self) -> impl Iterator<Item = (PlaceholderKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for PiiMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

// ═══════════════════════════════════════════════════════════
// Decode
// ═══════════════════════════════════════════════════════════

/// Result of placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Keys whose tokens were present but had no value in the map.
    pub missing_keys: Vec<PlaceholderKey>,
}

/// Replace every known token with its value (or the missing sentinel).
pub fn decode(text: &str, pii: &PiiMap) -> Decoded {
    let mut missing_keys = Vec::new();

    let out = KNOWN_TOKEN_RE.replace_all(text, |caps: &Captures| {
        match token_key(caps) {
            Some(key) => match pii.get(key) {
                Some(value) => value.to_string(),
                None => {
                    missing_keys.push(key);
                    key.missing_sentinel()
                }
            },
            None => caps[0].to_string(),
        }
    });
    let text = out.into_owned();

    missing_keys.sort();
    missing_keys.dedup();
    Decoded { text, missing_keys }
}

fn token_key(caps: &Captures) -> Option<PlaceholderKey> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| PlaceholderKey::from_name(m.as_str()))
}

fn neutralize_tokens(key: PlaceholderKey, value: &str) -> String {
    let mut out = value.to_string();
    if !KNOWN_TOKEN_RE.is_match(&out) {
        return out;
    }
    // Stripping one layer can expose another, e.g. `{{{CASE_ID}}}`.
    while KNOWN_TOKEN_RE.is_match(&out) {
        out = KNOWN_TOKEN_RE
            .replace_all(&out, |caps: &Captures| {
                token_key(caps).map_or_else(|| caps[0].to_string(), |k| k.as_str().to_string())
            })
            .into_owned();
    }
    tracing::warn!(key = %key, "Placeholder syntax stripped from PII value");
    out
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

/// `false` if the text holds a single `{` or `}` with no same brace
/// directly beside it.
pub fn validate_placeholders(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c != '{' && c != '}' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        if prev != Some(c) && next != Some(c) {
            return false;
        }
    }
    true
}

static DOUBLE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").expect("valid regex"));

fn key_alternation() -> String {
    let names: Vec<&str> = PlaceholderKey::all().iter().map(|k| k.as_str()).collect();
    names.join("|")
}

static SINGLE_KNOWN_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\{{(?:{})\}}", key_alternation())).expect("valid regex")
});

/// Group 1 holds the name of a double token, group 2 of a single one.
static KNOWN_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let names = key_alternation();
    Regex::new(&format!(r"\{{\{{({names})\}}\}}|\{{({names})\}}")).expect("valid regex")
});

static ANY_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\{{\{{[^{{}}]*\}}\}}|\{{(?:{})\}}", key_alternation()))
        .expect("valid regex")
});

/// Byte ranges of every `{{...}}` token and every single-brace known token.
pub fn token_spans(text: &str) -> Vec<Range<usize>> {
    ANY_TOKEN_RE.find_iter(text).map(|m| m.range()).collect()
}

/// Every `{{...}}` token and every single-brace known token still present.
pub fn find_unresolved(text: &str) -> Vec<String> {
    let mut found: Vec<String> = DOUBLE_TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    let without_double = DOUBLE_TOKEN_RE.replace_all(text, "");
    found.extend(
        SINGLE_KNOWN_TOKEN_RE
            .find_iter(&without_double)
            .map(|m| m.as_str().to_string()),
    );
    found
}

/// Tokens in the text that name a known key, in either form.
pub fn referenced_keys(text: &str) -> Vec<PlaceholderKey> {
    PlaceholderKey::all()
        .iter()
        .copied()
        .filter(|k| text.contains(&k.single_brace_token()))
        .collect()
}

/// Name inside an unresolved token: `{{ FOO }}` → `FOO`.
pub fn token_name(token: &str) -> &str {
    token.trim_matches(|c| c == '{' || c == '}').trim()
}
