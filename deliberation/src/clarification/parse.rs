//! Tolerant parsing of analyst replies.
//!
//! Models routinely wrap their JSON in markdown code fences; those are
//! stripped before parsing. A reply that still isn't JSON is carried as
//! raw text — never discarded — and callers consume both shapes through
//! one two-variant result.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*\n([\s\S]*?)\n\s*```").expect("valid fence regex")
});

/// Outcome of parsing one analyst reply.
#[derive(Debug, Clone)]
pub enum AnalystReply {
    /// The reply parsed as a JSON object.
    Structured(serde_json::Value),
    /// Not JSON; the raw text is used verbatim downstream.
    Raw(String),
}

/// Extract the body of the first markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE_RE.captures(text) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()).trim(),
        None => text.trim(),
    }
}

/// Parse a reply, recovering fence-wrapped JSON. Never fails: a
/// non-JSON reply comes back as [`AnalystReply::Raw`].
pub fn parse_analyst_reply(text: &str) -> AnalystReply {
    let candidate = strip_code_fences(text);
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) if value.is_object() => AnalystReply::Structured(value),
        _ => AnalystReply::Raw(text.trim().to_string()),
    }
}

/// Read a string field from a structured reply, falling back to the
/// raw reply text when the field is absent or not a string.
pub fn string_field_or<'a>(value: &'a serde_json::Value, field: &str, fallback: &'a str) -> String {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
        .to_string()
}

/// Read an optional string field.
pub fn optional_string_field(value: &serde_json::Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Read a string-array field, defaulting to empty.
pub fn string_list_field(value: &serde_json::Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_and_bare_json_parse_identically() {
        let bare = r#"{"question": "What format?", "required": true}"#;
        let fenced = format!("```json\n{bare}\n```");
        let plain_fence = format!("```\n{bare}\n```");

        for text in [bare.to_string(), fenced, plain_fence] {
            match parse_analyst_reply(&text) {
                AnalystReply::Structured(v) => {
                    assert_eq!(v["question"], "What format?");
                    assert_eq!(v["required"], true);
                }
                AnalystReply::Raw(_) => panic!("expected structured parse for {text:?}"),
            }
        }
    }

    #[test]
    fn non_json_reply_survives_as_raw_text() {
        let text = "Could you say more about the audience?";
        match parse_analyst_reply(text) {
            AnalystReply::Raw(raw) => assert_eq!(raw, text),
            AnalystReply::Structured(_) => panic!("plain prose is not structured"),
        }
    }

    #[test]
    fn json_scalar_is_treated_as_raw() {
        match parse_analyst_reply("42") {
            AnalystReply::Raw(raw) => assert_eq!(raw, "42"),
            AnalystReply::Structured(_) => panic!("bare scalar is not a contract object"),
        }
    }

    #[test]
    fn fence_with_surrounding_prose_is_stripped() {
        let text = "Here you go:\n```json\n{\"type\": \"briefing\", \"briefing\": \"b\"}\n```\nLet me know.";
        match parse_analyst_reply(text) {
            AnalystReply::Structured(v) => assert_eq!(v["type"], "briefing"),
            AnalystReply::Raw(_) => panic!("fenced JSON should parse"),
        }
    }

    #[test]
    fn list_field_defaults_to_empty() {
        let v = serde_json::json!({"key_facts": ["a", "b"]});
        assert_eq!(string_list_field(&v, "key_facts"), vec!["a", "b"]);
        assert!(string_list_field(&v, "constraints").is_empty());
    }
}
