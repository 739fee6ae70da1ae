//! Reading decisions out of model replies.
//!
//! Replies arrive as bare JSON, JSON inside a fenced block, JSON buried in
//! prose, or plain prose. Actions come in the descriptor shape or the
//! computer-use `{name, args, safety_decision}` shape. Anything proposed as
//! an action that cannot be read is counted in [`Decision::dropped`] so the
//! caller never mistakes a garbled batch for a finished task.

use super::Decision;
use serde_json::{Map, Value};
use submit_agent_types::ActionDescriptor;

/// Fenced blocks of `s` in order, as `(language tag, body)`.
///
/// An unterminated trailing fence still yields its body.
pub fn fenced_blocks(s: &str) -> Vec<(&str, &str)> {
    s.split("```")
        .skip(1)
        .step_by(2)
        .map(|inner| match inner.split_once('\n') {
            Some((tag, body)) if is_fence_tag(tag) => (tag.trim(), body.trim()),
            _ => ("", inner.trim()),
        })
        .filter(|(_, body)| !body.is_empty())
        .collect()
}

fn is_fence_tag(line: &str) -> bool {
    let line = line.trim();
    !line.starts_with(['{', '['])
        && line.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Top-level `{...}` / `[...]` spans of `s`, left to right.
///
/// Brackets inside JSON strings do not count; quotes outside a span are
/// treated as prose.
pub fn json_spans(s: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
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
            '{' | '[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}

fn last_parsable_span(s: &str) -> Option<Value> {
    json_spans(s)
        .into_iter()
        .rev()
        .find_map(|span| serde_json::from_str(span).ok())
}

/// The JSON value a reply carries, if any.
///
/// Tries the whole reply, then fenced blocks (```json first, latest first),
/// then the latest parsable span in the prose.
pub fn extract_json(content: &str) -> Option<Value> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(content) {
        return Some(v);
    }

    let blocks = fenced_blocks(content);
    let tagged = blocks
        .iter()
        .rev()
        .filter(|(tag, _)| tag.eq_ignore_ascii_case("json"));
    let untagged = blocks
        .iter()
        .rev()
        .filter(|(tag, _)| !tag.eq_ignore_ascii_case("json"));
    for (_, body) in tagged.chain(untagged) {
        if let Ok(v) = serde_json::from_str::<Value>(body) {
            return Some(v);
        }
        if let Some(v) = last_parsable_span(body) {
            return Some(v);
        }
    }

    last_parsable_span(content)
}

const TEXT_KEYS: [&str; 3] = ["text", "message", "final_text"];
const ACTION_KEYS: [&str; 3] = ["actions", "function_calls", "steps"];

/// Turn raw assistant content into a [`Decision`].
///
/// Content without any JSON is terminal text.
pub fn parse_decision(content: &str) -> Decision {
    let Some(value) = extract_json(content) else {
        return Decision::text(content.trim());
    };

    match value {
        Value::Array(items) => read_actions(items),
        Value::Object(obj) => {
            let text = TEXT_KEYS
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .trim()
                .to_string();

            let proposed = match ACTION_KEYS.iter().find_map(|k| obj.get(*k)) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None if names_action(&obj) => vec![Value::Object(obj.clone())],
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other.clone()],
            };

            Decision {
                text,
                ..read_actions(proposed)
            }
        }
        Value::String(s) => Decision::text(s.trim()),
        _ => Decision::text(content.trim()),
    }
}

fn names_action(obj: &Map<String, Value>) -> bool {
    ["kind", "action", "name"].iter().any(|k| obj.contains_key(*k))
}

fn read_actions(items: Vec<Value>) -> Decision {
    let mut decision = Decision::default();
    for item in items {
        let parsed = to_descriptor_shape(item.clone())
            .and_then(|shaped| serde_json::from_value::<ActionDescriptor>(shaped).ok());
        match parsed {
            Some(action) => decision.actions.push(action),
            None => {
                log::warn!("unreadable action proposed: {}", item);
                decision.dropped += 1;
            }
        }
    }
    decision
}

/// Rewrite one proposed action into the [`ActionDescriptor`] field names.
fn to_descriptor_shape(item: Value) -> Option<Value> {
    let Value::Object(mut obj) = item else {
        return None;
    };

    if let Some(Value::Object(args)) = obj.remove("args").or_else(|| obj.remove("arguments")) {
        for (k, v) in args {
            obj.entry(k).or_insert(v);
        }
    }

    if !obj.contains_key("kind") {
        let kind = ["action", "name", "type"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?
            .to_string();
        obj.insert("kind".into(), Value::String(kind));
    }

    for (alias, field) in [("destination_x", "dest_x"), ("destination_y", "dest_y")] {
        if let Some(v) = obj.remove(alias) {
            obj.entry(field).or_insert(v);
        }
    }

    match obj.remove("safety_decision") {
        Some(Value::String(label)) => {
            obj.entry("risk").or_insert(Value::String(label));
        }
        Some(Value::Object(safety)) => {
            if let Some(label) = safety.get("decision").cloned() {
                obj.entry("risk").or_insert(label);
            }
            if let Some(why) = safety.get("explanation").cloned() {
                obj.entry("explanation").or_insert(why);
            }
        }
        _ => {}
    }

    // unknown labels are gated rather than ignored
    let unknown_risk = obj.get("risk").and_then(Value::as_str).is_some_and(|label| {
        !matches!(
            label,
            "none" | "requires_confirmation" | "require_confirmation" | "block"
        )
    });
    if unknown_risk {
        obj.insert("risk".into(), Value::String("requires_confirmation".into()));
    }

    Some(Value::Object(obj))
}
