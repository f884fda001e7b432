//! DATE_SHIFT
//!
//! Every subject gets one offset per domain, taken from a keyed hash of the
//! subject's source identifier. Repeated runs shift the same subject's dates by
//! the same amount; different subjects are shifted independently.

use crate::deidentification::key::MappingKey;
use crate::domain::{DeidError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use serde_json::Value;

/// Domain used when a DATE_SHIFT rule names none
pub const DEFAULT_DATE_SHIFT_DOMAIN: &str = "date_shift";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A parsed temporal value plus what is needed to write it back in its
/// original layout
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Temporal {
    Date(NaiveDate, &'static str),
    DateTime(NaiveDateTime, &'static str),
    Zoned(DateTime<FixedOffset>, bool),
}

impl Temporal {
    /// Recognises ISO dates, US `MM/DD/YYYY`, naive timestamps and RFC 3339
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let text = text.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Temporal::Zoned(dt, text.ends_with('Z') || text.ends_with('z')));
        }
        for fmt in DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
                return Some(Temporal::Date(d, *fmt));
            }
        }
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
                return Some(Temporal::DateTime(dt, *fmt));
            }
        }
        None
    }

    pub(crate) fn date(&self) -> NaiveDate {
        match self {
            Temporal::Date(d, _) => *d,
            Temporal::DateTime(dt, _) => dt.date(),
            Temporal::Zoned(dt, _) => dt.date_naive(),
        }
    }

    fn shift(&self, days: i64) -> Option<Self> {
        let delta = Duration::days(days);
        Some(match self {
            Temporal::Date(d, fmt) => Temporal::Date(d.checked_add_signed(delta)?, *fmt),
            Temporal::DateTime(dt, fmt) => {
                Temporal::DateTime(dt.checked_add_signed(delta)?, *fmt)
            }
            Temporal::Zoned(dt, z) => Temporal::Zoned(dt.checked_add_signed(delta)?, *z),
        })
    }

    fn render(&self) -> String {
        match self {
            Temporal::Date(d, fmt) => d.format(fmt).to_string(),
            Temporal::DateTime(dt, fmt) => dt.format(fmt).to_string(),
            Temporal::Zoned(dt, use_z) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, *use_z),
        }
    }
}

/// Offset in days for `subject` within `domain`, never zero, within
/// `[-max_days, max_days]`
pub fn offset_days(key: &MappingKey, domain: &str, subject: &str, max_days: u32) -> i64 {
    let tag = key.sign(&[b"date_shift", domain.as_bytes(), subject.as_bytes()]);
    let mut head = [0u8; 8];
    head.copy_from_slice(&tag.as_ref()[..8]);

    let max = i64::from(max_days.max(1));
    let n = (u64::from_be_bytes(head) % (2 * max as u64)) as i64;
    if n < max {
        -(n + 1)
    } else {
        n - max + 1
    }
}

/// Shifts a date or timestamp value, keeping its textual layout
///
/// # Errors
///
/// `TypeMismatch` when the value is not a recognised date or the shift leaves
/// the representable range.
pub fn shift_value(value: &Value, days: i64) -> Result<Value> {
    let text = match value {
        Value::String(s) => s,
        other => {
            return Err(DeidError::TypeMismatch(format!(
                "DATE_SHIFT expects a date, got {}",
                json_kind(other)
            )))
        }
    };

    let parsed = Temporal::parse(text)
        .ok_or_else(|| DeidError::TypeMismatch("DATE_SHIFT value is not a date".to_string()))?;
    let shifted = parsed
        .shift(days)
        .ok_or_else(|| DeidError::TypeMismatch("DATE_SHIFT result out of range".to_string()))?;

    Ok(Value::String(shifted.render()))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn key() -> MappingKey {
        MappingKey::new(b"date-shift-test-key")
    }

    #[test]
    fn test_offset_is_stable_and_bounded() {
        let key = key();
        for subject in ["A1234", "B5678", "C0001", "D0002", "E0003"] {
            let a = offset_days(&key, "date_shift", subject, 30);
            let b = offset_days(&key, "date_shift", subject, 30);
            assert_eq!(a, b);
            assert!(a != 0 && (-30..=30).contains(&a), "offset {a} for {subject}");
        }
    }

    #[test]
    fn test_offset_depends_on_domain() {
        let key = key();
        let offsets: std::collections::HashSet<i64> = (0..20)
            .map(|i| offset_days(&key, &format!("domain-{i}"), "A1234", 3650))
            .collect();
        assert!(offsets.len() > 1);
    }

    #[test]
    fn test_one_day_window() {
        let offset = offset_days(&key(), "d", "s", 1);
        assert!(offset == 1 || offset == -1);
    }

    #[test_case("1980-05-01", 5, "1980-05-06" ; "iso date")]
    #[test_case("1980-05-01", -1, "1980-04-30" ; "month boundary")]
    #[test_case("05/01/1980", 3, "05/04/1980" ; "us date")]
    #[test_case("1980-05-01T08:30:00", 1, "1980-05-02T08:30:00" ; "naive timestamp")]
    #[test_case("1980-05-01 08:30:00.250", 1, "1980-05-02 08:30:00.250" ; "space timestamp")]
    #[test_case("1980-05-01T08:30:00Z", -2, "1980-04-29T08:30:00Z" ; "utc timestamp")]
    #[test_case("1980-05-01T08:30:00+02:00", 1, "1980-05-02T08:30:00+02:00" ; "offset timestamp")]
    fn test_shift_keeps_layout(input: &str, days: i64, expected: &str) {
        assert_eq!(shift_value(&json!(input), days).unwrap(), json!(expected));
    }

    #[test]
    fn test_not_a_date() {
        assert!(matches!(
            shift_value(&json!("yesterday"), 3),
            Err(DeidError::TypeMismatch(_))
        ));
        assert!(matches!(
            shift_value(&json!(19800501), 3),
            Err(DeidError::TypeMismatch(_))
        ));
    }
}
