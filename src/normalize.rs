//! Best-effort recovery of structured data from tool result payloads.
//!
//! Tool backends answer in whatever shape their transport and
//! implementation produce: a plain JSON value, a JSON document wrapped in
//! a code fence or prose, a list of text fragments that only form a JSON
//! document once concatenated, or an arbitrary string. Each shape is
//! classified once into a [`RawToolPayload`] and then handled by its own
//! arm.
//!
//! ```text
//! Value ──classify──> RawToolPayload ──normalize arm──> Option<Value>
//!                                          │
//!                                          └─ text ──> loads_json_string
//!                                                       (whole, {..}, [..])
//! ```

use serde_json::{Map, Value};

/// The shapes a raw tool payload can take.
#[derive(Debug, Clone, PartialEq)]
pub enum RawToolPayload<'a> {
    Null,
    /// A bare string.
    Text(&'a str),
    /// An object with a `type` and a string `text` field.
    Fragment(&'a str),
    /// Any other object; assumed to already be the tool's payload.
    Object(&'a Map<String, Value>),
    /// A non-empty array whose elements are all text fragments.
    FragmentList(Vec<&'a str>),
    /// An array with exactly one element.
    Single(&'a Value),
    /// Any other array.
    Array(&'a [Value]),
    /// Numbers and booleans.
    Scalar(&'a Value),
}

impl<'a> RawToolPayload<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::String(text) => Self::Text(text),
            Value::Object(map) => match fragment_text(value) {
                Some(text) => Self::Fragment(text),
                None => Self::Object(map),
            },
            Value::Array(items) => {
                let fragments: Vec<&str> = items.iter().filter_map(fragment_text).collect();
                if !items.is_empty() && fragments.len() == items.len() {
                    Self::FragmentList(fragments)
                } else if items.len() == 1 {
                    Self::Single(&items[0])
                } else {
                    Self::Array(items)
                }
            }
            Value::Bool(_) | Value::Number(_) => Self::Scalar(value),
        }
    }
}

/// Returns the `text` of a value shaped like a content fragment
/// (`{"type": ..., "text": "<string>"}`).
fn fragment_text(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if !map.contains_key("type") {
        return None;
    }
    map.get("text").and_then(Value::as_str)
}

/// Strict extraction: the structured value hidden in `raw`, or `None` when
/// nothing decodes.
pub fn parse_tool_content(raw: &Value) -> Option<Value> {
    match RawToolPayload::classify(raw) {
        RawToolPayload::Null => None,
        RawToolPayload::Text(text) => loads_json_string(text),
        RawToolPayload::Fragment(text) => loads_json_string(text),
        RawToolPayload::Object(_) => Some(raw.clone()),
        RawToolPayload::FragmentList(parts) => loads_json_string(&parts.concat()),
        RawToolPayload::Single(inner) => parse_tool_content(inner),
        RawToolPayload::Array(_) => Some(raw.clone()),
        RawToolPayload::Scalar(value) => loads_json_string(&value.to_string()),
    }
}

/// Normalize a tool payload for callers.
///
/// Returns the extracted structured value when there is one, otherwise the
/// raw payload unchanged so the caller always gets something readable.
/// Only a null payload yields `None`.
pub fn normalize(raw: &Value) -> Option<Value> {
    if raw.is_null() {
        return None;
    }
    Some(parse_tool_content(raw).unwrap_or_else(|| raw.clone()))
}

/// Find and decode the JSON document inside `raw`.
///
/// Tries, in order: the whole (fence-stripped) text, the span from the first
/// `{` to the last `}`, and the span from the first `[` to the last `]`.
pub fn loads_json_string(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    let cleaned = strip_code_fences(raw);
    candidate_json_strings(&cleaned)
        .into_iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

/// Drop the opening and closing fence lines of a fenced code block.
fn strip_code_fences(text: &str) -> String {
    let stripped = text.trim();
    if !stripped.starts_with("```") {
        return stripped.to_string();
    }
    let mut lines: Vec<&str> = stripped.lines().collect();
    if lines.first().is_some_and(|line| line.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| line.starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn candidate_json_strings(text: &str) -> Vec<&str> {
    let mut candidates = vec![text];
    candidates.extend(extract_span(text, '{', '}'));
    candidates.extend(extract_span(text, '[', ']'));
    candidates
}

fn extract_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..end + close.len_utf8()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json_string() {
        assert_eq!(
            normalize(&json!(r#"{"card": "V카드", "fee": 10000}"#)),
            Some(json!({"card": "V카드", "fee": 10000}))
        );
    }

    #[test]
    fn test_round_trip_of_encoded_values() {
        for value in [
            json!({"a": [1, 2, {"b": null}]}),
            json!([1, "two", 3.5]),
            json!("just a string"),
            json!(42),
            json!(true),
            json!(null),
        ] {
            let encoded = Value::String(value.to_string());
            assert_eq!(normalize(&encoded), Some(value));
        }
    }

    #[test]
    fn test_fenced_json() {
        assert_eq!(
            normalize(&json!("```json\n{\"a\":1}\n```")),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            normalize(&json!("```\n[1, 2]\n```")),
            Some(json!([1, 2]))
        );
    }

    #[test]
    fn test_fragment_concatenation() {
        let raw = json!([
            {"type": "text", "text": "{\"a\""},
            {"type": "text", "text": ":1}"}
        ]);
        assert_eq!(normalize(&raw), Some(json!({"a": 1})));
    }

    #[test]
    fn test_single_fragment_object() {
        let raw = json!({"type": "text", "text": "결과: {\"rate\": 1.5}"});
        assert_eq!(normalize(&raw), Some(json!({"rate": 1.5})));
    }

    #[test]
    fn test_single_element_list_recurses() {
        let raw = json!([{"type": "text", "text": "[\"a\", \"b\"]"}]);
        assert_eq!(normalize(&raw), Some(json!(["a", "b"])));

        let raw = json!(["{\"x\": 1}"]);
        assert_eq!(normalize(&raw), Some(json!({"x": 1})));
    }

    #[test]
    fn test_object_passes_through() {
        let raw = json!({"cards": [{"name": "카드의정석"}]});
        assert_eq!(normalize(&raw), Some(raw.clone()));
    }

    #[test]
    fn test_mixed_array_passes_through() {
        let raw = json!([{"type": "text", "text": "a"}, {"id": 1}]);
        assert_eq!(normalize(&raw), Some(raw.clone()));
    }

    #[test]
    fn test_garbage_falls_back_to_raw() {
        let raw = json!("not json at all");
        assert_eq!(normalize(&raw), Some(raw.clone()));
        assert_eq!(parse_tool_content(&raw), None);
    }

    #[test]
    fn test_null_is_none() {
        assert_eq!(normalize(&Value::Null), None);
    }

    #[test]
    fn test_prose_wrapped_object() {
        let text = "Here is the answer you asked for:\n{\"faq\": \"연회비\"}\nHope it helps.";
        assert_eq!(loads_json_string(text), Some(json!({"faq": "연회비"})));
    }

    #[test]
    fn test_array_span_when_object_span_fails() {
        let text = "items: [{\"a\": 1}, {\"b\": 2}] end";
        // The {..} span "{\"a\": 1}, {\"b\": 2}" is not a document; [..] is.
        assert_eq!(
            loads_json_string(text),
            Some(json!([{"a": 1}, {"b": 2}]))
        );
    }

    #[test]
    fn test_reversed_braces_are_not_a_span() {
        assert_eq!(extract_span("} nope {", '{', '}'), None);
        assert_eq!(loads_json_string("} nope {"), None);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(loads_json_string(""), None);
        assert_eq!(loads_json_string("   "), None);
    }

    #[test]
    fn test_classify() {
        let fragment = json!({"type": "text", "text": "hi"});
        assert_eq!(RawToolPayload::classify(&fragment), RawToolPayload::Fragment("hi"));

        let not_fragment = json!({"type": "text", "text": 5});
        assert!(matches!(
            RawToolPayload::classify(&not_fragment),
            RawToolPayload::Object(_)
        ));

        let empty = json!([]);
        assert!(matches!(RawToolPayload::classify(&empty), RawToolPayload::Array(_)));
    }
}
