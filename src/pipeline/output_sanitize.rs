//! Post-generation cleanup of raw model output.
//!
//! Strips reasoning blocks and stray special tokens, and flags narratives
//! that appear cut off. Runs before the leakage guard.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static SPECIAL_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<unused\d+>|<\|[a-z_]+\|>|</?s>|\[/?INST\]").expect("valid regex")
});

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[a-z]*\s*$").expect("valid regex"));

/// Strip model-specific artifacts from raw generator output.
///
/// Handles:
/// 1. `<think>...</think>` reasoning blocks
/// 2. Gemma `<unusedN>thought\n` prefixes and stray `<unusedN>` tokens
/// 3. Chat-template tokens (`<|eot_id|>`, `[INST]`, `</s>`)
/// 4. Markdown code fences wrapped around the narrative
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = THINK_BLOCK_RE.replace_all(raw, "").into_owned();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + "thought\n".len()..].to_string();
        }
    }

    text = SPECIAL_TOKEN_RE.replace_all(&text, "").into_owned();
    text = FENCE_RE.replace_all(&text, "").into_owned();
    text.trim().to_string()
}

/// Heuristic: the narrative ends without terminal punctuation.
pub fn is_likely_truncated(text: &str) -> bool {
    let trimmed = text.trim();
    match trimmed.chars().last() {
        Some(last) => !matches!(last, '.' | '!' | '?' | '"' | ')' | ']' | '}'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks() {
        let raw = "<think>The subject is probably...</think>\n{{CUSTOMER_NAME}} deposited cash.";
        assert_eq!(sanitize_llm_output(raw), "{{CUSTOMER_NAME}} deposited cash.");
    }

    #[test]
    fn strips_gemma_thinking_prefix() {
        let raw = "<unused94>thought\nLet me check.\n{{CUSTOMER_NAME}} deposited cash.";
        assert_eq!(
            sanitize_llm_output(raw),
            "Let me check.\n{{CUSTOMER_NAME}} deposited cash."
        );
    }

    #[test]
    fn strips_chat_template_tokens() {
        let raw = "[INST] {{CUSTOMER_NAME}} wired funds.<|eot_id|></s>";
        assert_eq!(sanitize_llm_output(raw), "{{CUSTOMER_NAME}} wired funds.");
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```text\n{{CUSTOMER_NAME}} wired funds.\n```";
        assert_eq!(sanitize_llm_output(raw), "{{CUSTOMER_NAME}} wired funds.");
    }

    #[test]
    fn placeholders_survive_cleanup() {
        let raw = "Case {{CASE_ID}} concerns {CUSTOMER_NAME}.";
        assert_eq!(sanitize_llm_output(raw), raw);
    }

    #[test]
    fn whitespace_only_returns_empty() {
        assert_eq!(sanitize_llm_output("   \n  "), "");
    }

    #[test]
    fn complete_sentence_not_truncated() {
        assert!(!is_likely_truncated("Funds were moved."));
        assert!(!is_likely_truncated("Reported for {{CASE_ID}}"));
    }

    #[test]
    fn mid_word_is_truncated() {
        assert!(is_likely_truncated("The subject then transfer"));
    }

    #[test]
    fn empty_not_truncated() {
        assert!(!is_likely_truncated(""));
    }
}
