//! REDACT

use regex::Regex;
use serde_json::Value;

/// Replaces the whole value, or only pattern matches inside it, with `placeholder`
///
/// Non-string values are redacted through their text form; if no pattern
/// matches, the original value is returned as is.
pub fn redact(value: &Value, placeholder: &str, patterns: &[Regex]) -> Value {
    if patterns.is_empty() {
        return Value::String(placeholder.to_string());
    }

    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut redacted = text.clone();
    for pattern in patterns {
        redacted = pattern.replace_all(&redacted, placeholder).into_owned();
    }

    if redacted == text {
        value.clone()
    } else {
        Value::String(redacted)
    }
}
