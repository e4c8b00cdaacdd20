//! Clean-up applied to model output before it is handed to `serde_json`.
//!
//! Models occasionally wrap JSON in Markdown fences or prepend a
//! `<think>...</think>` reasoning block even when told not to.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\n?|```").expect("static regex"))
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"))
}

/// Strip code fences and reasoning blocks.
pub fn strip_wrappers(text: &str) -> String {
    let without_fences = fence_re().replace_all(text, "");
    let without_think = think_re().replace_all(without_fences.trim(), "");
    without_think.trim().to_string()
}

/// Narrow to the span between the first `{` and the last `}`.
///
/// If there is no closing brace after the first opening one, everything from
/// the opening brace onwards is kept.
pub fn brace_span(text: &str) -> &str {
    match text.find('{') {
        Some(open) => match text.rfind('}') {
            Some(close) if close > open => &text[open..=close],
            _ => &text[open..],
        },
        None => text,
    }
}

/// Parse model output, retrying on the brace span if the stripped text
/// does not parse on its own.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let stripped = strip_wrappers(text);
    match serde_json::from_str(&stripped) {
        Ok(value) => Ok(value),
        Err(first) => {
            let span = brace_span(&stripped);
            if span.len() == stripped.len() {
                return Err(first);
            }
            serde_json::from_str(span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn strips_markdown_fences() {
        let text = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_wrappers(text), "{\"a\":1}");
    }

    #[test]
    fn strips_reasoning_block() {
        let text = "<think>\nlet me {plan} this\n</think>\n{\"a\":1}";
        assert_eq!(strip_wrappers(text), "{\"a\":1}");
    }

    #[test]
    fn lenient_parse_recovers_from_surrounding_prose() {
        let v: Value = parse_lenient("Sure! Here it is: {\"reading\":\"うみ\"} Enjoy.").unwrap();
        assert_eq!(v["reading"], "うみ");
    }

    #[test]
    fn lenient_parse_still_fails_on_garbage() {
        assert!(parse_lenient::<Value>("no json here").is_err());
    }

    #[test]
    fn brace_span_keeps_unterminated_tail() {
        assert_eq!(brace_span("xx {\"a\":"), "{\"a\":");
    }
}
