//! Plan coercion: a total function from raw generation output to a
//! valid [`Plan`].
//!
//! Three tiers, first success wins:
//! 1. parse the whole text as one JSON object;
//! 2. scan for the first balanced top-level object (quoted-string
//!    aware, so braces inside string literals don't count) and parse
//!    that slice — tolerates prose and markdown fences around the
//!    payload;
//! 3. fall back to the safe default plan with a degradation marker.
//!
//! Missing fields in a successfully parsed object are filled from the
//! safe default field-by-field; a parse failure never propagates.

use serde_json::Value;
use tracing::warn;

use crate::models::{Plan, DEGRADED_EXPLAIN_PREFIX};

/// How much of the unusable raw text is kept in the degraded explain.
const RAW_EXCERPT_CHARS: usize = 300;

/// Extract a well-formed plan from raw generation output. Never fails.
pub fn coerce_plan(raw: &str) -> Plan {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return plan_from_object(Value::Object(map));
    }

    if let Some(candidate) = extract_json_object(raw) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return plan_from_object(Value::Object(map));
        }
    }

    warn!(
        chars = raw.len(),
        "generation output unusable, falling back to safe default plan"
    );
    let mut plan = Plan::safe_default();
    plan.explain = format!(
        "{DEGRADED_EXPLAIN_PREFIX} generation output could not be parsed; \
         returning a generic plan. Raw output began: {}",
        excerpt(raw)
    );
    plan
}

/// First balanced top-level `{...}` in `raw`, or `None`.
///
/// Explicit scanner with an integer depth counter and a
/// quoted-string-aware skip rule; regex heuristics miscount braces
/// inside string literals.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let begin = start?;
                        return Some(&raw[begin..idx + ch.len_utf8()]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Build a plan from a parsed JSON object, filling any missing or
/// mistyped field from the safe default.
fn plan_from_object(value: Value) -> Plan {
    let defaults = Plan::safe_default();

    let budget = value
        .get("budget")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect()
        })
        .unwrap_or(defaults.budget);

    let cards = value
        .get("cards")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or(defaults.cards);

    let actions = value
        .get("actions")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or(defaults.actions);

    let explain = value
        .get("explain")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Generated plan (no model explanation provided).".to_string());

    Plan {
        budget,
        cards,
        actions,
        explain,
    }
}

fn excerpt(raw: &str) -> &str {
    match raw.char_indices().nth(RAW_EXCERPT_CHARS) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_reproduces_plan_exactly() {
        let mut plan = Plan::safe_default();
        plan.cards.insert("groceries".to_string(), "Amex Gold".to_string());
        plan.explain = "because supermarkets".to_string();

        let serialized = serde_json::to_string(&plan).unwrap();
        assert_eq!(coerce_plan(&serialized), plan);
    }

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let raw = r#"Sure, here you go: {"budget":{"essentials":0.5}} thanks!"#;
        let plan = coerce_plan(raw);
        assert_eq!(plan.budget.len(), 1);
        assert_eq!(plan.budget["essentials"], 0.5);
        // Missing fields filled from the safe default.
        assert_eq!(plan.cards, Plan::safe_default().cards);
        assert_eq!(plan.actions, Plan::safe_default().actions);
        assert!(!plan.explain.is_empty());
    }

    #[test]
    fn extracts_object_inside_markdown_fence() {
        let raw = "```json\n{\"budget\":{\"savings\":1.0},\"explain\":\"ok\"}\n```";
        let plan = coerce_plan(raw);
        assert_eq!(plan.budget["savings"], 1.0);
        assert_eq!(plan.explain, "ok");
    }

    #[test]
    fn braces_inside_string_literals_are_ignored() {
        let raw = r#"note {"explain":"use {brackets} wisely","budget":{"wants":1.0}} end"#;
        let plan = coerce_plan(raw);
        assert_eq!(plan.explain, "use {brackets} wisely");
        assert_eq!(plan.budget["wants"], 1.0);
    }

    #[test]
    fn escaped_quotes_inside_strings_are_handled() {
        let raw = r#"{"explain":"she said \"hi\" {","budget":{"essentials":1.0}}"#;
        let plan = coerce_plan(raw);
        assert_eq!(plan.explain, r#"she said "hi" {"#);
    }

    #[test]
    fn unrecognizable_text_falls_back_to_safe_default() {
        let plan = coerce_plan("I am sorry, I cannot help with that.");
        let defaults = Plan::safe_default();
        assert_eq!(plan.budget, defaults.budget);
        assert_eq!(plan.cards, defaults.cards);
        assert_eq!(plan.actions, defaults.actions);
        assert!(plan.is_degraded());
        assert!(plan.explain.contains("I am sorry"));
    }

    #[test]
    fn unbalanced_object_falls_back() {
        let plan = coerce_plan(r#"{"budget": {"essentials": 0.5"#);
        assert!(plan.is_degraded());
    }

    #[test]
    fn empty_input_falls_back() {
        assert!(coerce_plan("").is_degraded());
    }

    #[test]
    fn extract_finds_first_top_level_object() {
        let raw = "a {\"x\":1} b {\"y\":2}";
        assert_eq!(extract_json_object(raw), Some("{\"x\":1}"));
    }

    #[test]
    fn extract_handles_nested_objects() {
        let raw = "prefix {\"a\":{\"b\":{\"c\":3}}} suffix";
        assert_eq!(extract_json_object(raw), Some("{\"a\":{\"b\":{\"c\":3}}}"));
    }

    #[test]
    fn extract_returns_none_without_object() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unclosed"), None);
    }

    #[test]
    fn mistyped_fields_fall_back_per_field() {
        // budget is an array, cards is fine.
        let raw = r#"{"budget": [1,2], "cards": {"gas": "Costco Visa"}}"#;
        let plan = coerce_plan(raw);
        assert_eq!(plan.budget, Plan::safe_default().budget);
        assert_eq!(plan.cards["gas"], "Costco Visa");
    }
}
