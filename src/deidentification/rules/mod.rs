//! Per-kind transforms
//!
//! Each module implements one rule kind over a single field value. None of them
//! touch storage; PSEUDONYMIZE only produces candidates, and the mapping store
//! decides which one sticks.

pub mod date_shift;
pub mod generalization;
pub mod masking;
pub mod pseudonym;
pub mod redaction;
pub mod suppression;

pub use date_shift::{offset_days, shift_value, DEFAULT_DATE_SHIFT_DOMAIN};
pub use generalization::generalize;
pub use masking::{mask, MaskParams};
pub use pseudonym::{matches_format, opaque_token, sequential_token, source_hash};
pub use redaction::redact;
pub use suppression::suppress;

use serde_json::Value;

/// Result of applying one rule to one field
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Replacement value (NULL for field suppression)
    Value(Value),
    /// Remove the whole row from the output
    DropRow,
}

/// Text form of a scalar value; `None` for NULL
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
