//! JSON extraction from free-form model output.
//!
//! Vision models rarely return bare JSON. They wrap it in fenced code blocks,
//! prefix it with prose, or trail it with commentary. [`extract_json`] tries a
//! fixed list of strategies in order and returns the first JSON object found.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// A single extraction attempt. Returns `None` when it finds nothing usable.
pub type Strategy = fn(&str) -> Option<JsonObject>;

/// Extraction strategies in priority order.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("json_fence", from_json_fence),
    ("plain_fence", from_plain_fence),
    ("brace_scan", from_brace_scan),
    ("whole_text", from_whole_text),
];

/// Extract the first JSON object from `text`, or `None` if no strategy succeeds.
pub fn extract_json(text: &str) -> Option<JsonObject> {
    extract_json_with_strategy(text).map(|(_, obj)| obj)
}

/// Like [`extract_json`], also naming the strategy that succeeded.
pub fn extract_json_with_strategy(text: &str) -> Option<(&'static str, JsonObject)> {
    STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(text).map(|obj| (*name, obj)))
}

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json\s*\n?(.*?)\n?\s*```").expect("Invalid json fence regex"));

static PLAIN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*\n?(.*?)\n?\s*```").expect("Invalid plain fence regex"));

// One level of nesting: `{ ... { ... } ... }`.
static BRACE_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("Invalid brace object regex")
});

fn parse_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn from_json_fence(text: &str) -> Option<JsonObject> {
    let caps = JSON_FENCE.captures(text)?;
    parse_object(caps.get(1)?.as_str())
}

fn from_plain_fence(text: &str) -> Option<JsonObject> {
    let caps = PLAIN_FENCE.captures(text)?;
    parse_object(caps.get(1)?.as_str())
}

fn from_brace_scan(text: &str) -> Option<JsonObject> {
    BRACE_OBJECT
        .find_iter(text)
        .find_map(|m| parse_object(m.as_str()))
}

fn from_whole_text(text: &str) -> Option<JsonObject> {
    parse_object(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> JsonObject {
        match v {
            Value::Object(o) => o,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_fenced_json_round_trip() {
        let value = json!({"has-co-detector": true, "color": "orange", "position": "chest"});
        let text = format!("```json\n{}\n```", serde_json::to_string(&value).unwrap());
        assert_eq!(extract_json(&text), Some(obj(value)));
    }

    #[test]
    fn test_fence_with_prose() {
        let text = "Sure, here you go:\n```json\n{\"has-co-detector\": true}\n```\nLet me know if you need more.";
        let (strategy, parsed) = extract_json_with_strategy(text).unwrap();
        assert_eq!(strategy, "json_fence");
        assert_eq!(parsed, obj(json!({"has-co-detector": true})));
    }

    #[test]
    fn test_fence_marker_case_insensitive() {
        let text = "```JSON\n{\"gaze_direction\": \"upstream\"}\n```";
        let (strategy, parsed) = extract_json_with_strategy(text).unwrap();
        assert_eq!(strategy, "json_fence");
        assert_eq!(parsed["gaze_direction"], "upstream");
    }

    #[test]
    fn test_plain_fence() {
        let text = "Result:\n```\n{\"gaze_direction\": \"downstream\"}\n```";
        let (strategy, parsed) = extract_json_with_strategy(text).unwrap();
        assert_eq!(strategy, "plain_fence");
        assert_eq!(parsed["gaze_direction"], "downstream");
    }

    #[test]
    fn test_broken_json_fence_falls_through_to_brace_scan() {
        let text = "```json\n{not valid}\n``` but later {\"a\": 1}";
        let (strategy, parsed) = extract_json_with_strategy(text).unwrap();
        assert_eq!(strategy, "brace_scan");
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn test_brace_scan_skips_unparseable_candidates() {
        let text = "I think {maybe} the answer is {\"has-co-detector\": false, \"meta\": {\"k\": 1}} ok";
        let parsed = extract_json(text).unwrap();
        assert_eq!(parsed["has-co-detector"], false);
        assert_eq!(parsed["meta"]["k"], 1);
    }

    #[test]
    fn test_raw_json() {
        let parsed = extract_json("  {\"gaze_direction\": \"clearly_diverted\"}  ").unwrap();
        assert_eq!(parsed["gaze_direction"], "clearly_diverted");
    }

    #[test]
    fn test_two_level_nesting_yields_inner_object() {
        // The brace scan only understands one level of nesting, so it settles on
        // the innermost span it can match before the whole text is tried.
        let text = r#"{"a": {"b": {"c": 1}}}"#;
        let (strategy, parsed) = extract_json_with_strategy(text).unwrap();
        assert_eq!(strategy, "brace_scan");
        assert_eq!(parsed["b"]["c"], 1);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert_eq!(extract_json("no json here at all"), None);
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_json("```\nnot json\n```"), None);
    }

    #[test]
    fn test_non_object_json_is_rejected() {
        assert_eq!(extract_json("[1, 2, 3]"), None);
        assert_eq!(extract_json("```json\n42\n```"), None);
    }
}
