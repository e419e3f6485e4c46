//! Reconciling loosely-typed model replies

use serde_json::{Map, Value};

/// Confidence assumed when a model returns a value without a score
pub const UNSCORED_CONFIDENCE: f32 = 0.5;

/// Outcome for one field of a model reply
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Resolved { value: String, confidence: f32 },
    Unresolved,
    Malformed { raw: String },
}

/// Parse a primary-pass reply into a per-field map
///
/// Accepts `{"mappings": {...}}`, `{"field_mappings": {...}}` or a flat object.
/// Returns `None` when no JSON object can be recovered from the reply.
pub fn parse_primary(content: &str) -> Option<Map<String, Value>> {
    let root = extract_json_object(content)?;
    field_map(root)
}

/// Parse a specialist reply for a single field
pub fn parse_specialist(content: &str, field_name: &str) -> Option<FieldOutcome> {
    let root = extract_json_object(content)?;

    if root.get("value").is_some() {
        return Some(outcome_for(&root));
    }

    let map = field_map(root)?;
    if let Some(entry) = map.get(field_name) {
        return Some(outcome_for(entry));
    }
    if map.len() == 1 {
        return map.values().next().map(outcome_for);
    }
    None
}

fn field_map(root: Value) -> Option<Map<String, Value>> {
    let Value::Object(mut obj) = root else {
        return None;
    };
    for wrapper in ["mappings", "field_mappings"] {
        if let Some(Value::Object(inner)) = obj.remove(wrapper) {
            return Some(inner);
        }
    }
    Some(obj)
}

/// Classify one entry of a reply
pub fn outcome_for(entry: &Value) -> FieldOutcome {
    let (value, confidence) = match entry {
        Value::Object(obj) => (obj.get("value").unwrap_or(&Value::Null), obj.get("confidence")),
        Value::String(_) | Value::Number(_) | Value::Null => (entry, None),
        other => {
            return FieldOutcome::Malformed {
                raw: other.to_string(),
            }
        }
    };

    let value = match value {
        Value::Null => return FieldOutcome::Unresolved,
        Value::String(s) if s.trim().is_empty() => return FieldOutcome::Unresolved,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return FieldOutcome::Malformed {
                raw: other.to_string(),
            }
        }
    };

    let confidence = match confidence {
        None | Some(Value::Null) => UNSCORED_CONFIDENCE,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) => f as f32,
            None => return FieldOutcome::Malformed { raw: entry.to_string() },
        },
        Some(Value::String(s)) => match s.trim().trim_end_matches('%').parse::<f32>() {
            Ok(f) => f,
            Err(_) => return FieldOutcome::Malformed { raw: entry.to_string() },
        },
        Some(_) => return FieldOutcome::Malformed { raw: entry.to_string() },
    };

    match normalize_confidence(confidence) {
        Some(confidence) => FieldOutcome::Resolved { value, confidence },
        None => FieldOutcome::Malformed {
            raw: entry.to_string(),
        },
    }
}

/// Rescale percentages and clamp; NaN and infinities are rejected
fn normalize_confidence(confidence: f32) -> Option<f32> {
    if !confidence.is_finite() {
        return None;
    }
    let scaled = if confidence > 1.0 && confidence <= 100.0 {
        confidence / 100.0
    } else {
        confidence
    };
    Some(scaled.clamp(0.0, 1.0))
}

/// Recover the first JSON object from a reply that may carry prose or fences
pub fn extract_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(inner) = strip_fences(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    let candidate = first_balanced_object(trimmed)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_fences(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_open = &content[start + 3..];
    // skip an info string such as "json"
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

fn first_balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
