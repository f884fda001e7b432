//! GENERALIZE
//!
//! Outputs that are already at the target granularity pass through unchanged.

use super::date_shift::{json_kind, Temporal};
use crate::domain::{DeidError, Granularity, Result};
use chrono::Datelike;
use serde_json::Value;

/// Maps a value to its bucket at `granularity`
///
/// # Errors
///
/// `TypeMismatch` when the value does not parse as a date, an age or a postal
/// code respectively.
pub fn generalize(value: &Value, granularity: &Granularity) -> Result<Value> {
    match granularity {
        Granularity::Year => to_year(value),
        Granularity::Month => to_month(value),
        Granularity::AgeBand { width } => to_age_band(value, *width),
        Granularity::ZipPrefix { digits } => to_zip_prefix(value, *digits),
    }
}

fn mismatch(expected: &str, value: &Value) -> DeidError {
    DeidError::TypeMismatch(format!(
        "GENERALIZE expects {expected}, got {}",
        json_kind(value)
    ))
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn to_year(value: &Value) -> Result<Value> {
    match value {
        Value::Number(n) if n.as_u64().is_some_and(|y| (1000..=9999).contains(&y)) => {
            Ok(value.clone())
        }
        Value::String(s) if is_digits(s.trim(), 4) => Ok(value.clone()),
        Value::String(s) => Temporal::parse(s)
            .map(|t| Value::String(format!("{:04}", t.date().year())))
            .ok_or_else(|| mismatch("a date", value)),
        _ => Err(mismatch("a date", value)),
    }
}

fn to_month(value: &Value) -> Result<Value> {
    let Value::String(s) = value else {
        return Err(mismatch("a date", value));
    };

    let trimmed = s.trim();
    if let Some((y, m)) = trimmed.split_once('-') {
        if is_digits(y, 4) && is_digits(m, 2) {
            return Ok(value.clone());
        }
    }

    Temporal::parse(trimmed)
        .map(|t| {
            let d = t.date();
            Value::String(format!("{:04}-{:02}", d.year(), d.month()))
        })
        .ok_or_else(|| mismatch("a date", value))
}

/// Ages above this are treated as data errors, not banded
pub const MAX_AGE: f64 = 150.0;

fn to_age_band(value: &Value, width: u32) -> Result<Value> {
    let age = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if is_band(trimmed) {
                return Ok(value.clone());
            }
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|a| a.is_finite() && (0.0..=MAX_AGE).contains(a))
    .ok_or_else(|| mismatch("an age between 0 and 150", value))?;

    let width = u64::from(width.max(1));
    let low = (age.floor() as u64 / width) * width;
    let high = low.saturating_add(width - 1);
    Ok(Value::String(format!("{low}-{high}")))
}

fn is_band(s: &str) -> bool {
    s.split_once('-').is_some_and(|(lo, hi)| {
        !lo.is_empty()
            && !hi.is_empty()
            && lo.bytes().all(|b| b.is_ascii_digit())
            && hi.bytes().all(|b| b.is_ascii_digit())
    })
}

fn to_zip_prefix(value: &Value, digits: usize) -> Result<Value> {
    let text = match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|z| *z <= 99_999)
            .map(|z| format!("{z:05}")),
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
    .ok_or_else(|| mismatch("a postal code", value))?;

    let prefix: String = text.chars().take(digits).collect();
    if prefix.chars().count() < digits || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(mismatch("a postal code", value));
    }

    let pad = 5usize.saturating_sub(digits);
    Ok(Value::String(format!("{prefix}{}", "X".repeat(pad))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!("1980-05-01"), json!("1980") ; "iso date")]
    #[test_case(json!("1980-05-01T08:00:00Z"), json!("1980") ; "timestamp")]
    #[test_case(json!("1980"), json!("1980") ; "already a year")]
    #[test_case(json!(1980), json!(1980) ; "numeric year")]
    fn test_year(input: Value, expected: Value) {
        assert_eq!(generalize(&input, &Granularity::Year).unwrap(), expected);
    }

    #[test]
    fn test_month() {
        assert_eq!(
            generalize(&json!("1980-05-01"), &Granularity::Month).unwrap(),
            json!("1980-05")
        );
        assert_eq!(
            generalize(&json!("1980-05"), &Granularity::Month).unwrap(),
            json!("1980-05")
        );
    }

    #[test_case(json!(37), 5, "35-39" ; "numeric age")]
    #[test_case(json!("42"), 10, "40-49" ; "text age")]
    #[test_case(json!(0), 5, "0-4" ; "newborn")]
    #[test_case(json!("35-39"), 5, "35-39" ; "already banded")]
    #[test_case(json!(150), 1000, "0-999" ; "wide band")]
    fn test_age_band(input: Value, width: u32, expected: &str) {
        assert_eq!(
            generalize(&input, &Granularity::AgeBand { width }).unwrap(),
            json!(expected)
        );
    }

    #[test_case(json!("02139"), 3, "021XX" ; "three digits")]
    #[test_case(json!("02139-4307"), 5, "02139" ; "zip plus four")]
    #[test_case(json!(2139), 3, "021XX" ; "numeric zip loses leading zero")]
    #[test_case(json!("021XX"), 3, "021XX" ; "already generalized")]
    fn test_zip_prefix(input: Value, digits: usize, expected: &str) {
        assert_eq!(
            generalize(&input, &Granularity::ZipPrefix { digits }).unwrap(),
            json!(expected)
        );
    }

    #[test_case(json!("not a date"), Granularity::Year ; "bad date")]
    #[test_case(json!(true), Granularity::Month ; "boolean month")]
    #[test_case(json!("unknown"), Granularity::AgeBand { width: 5 } ; "bad age")]
    #[test_case(json!(-3), Granularity::AgeBand { width: 5 } ; "negative age")]
    #[test_case(json!(1e30), Granularity::AgeBand { width: 7 } ; "huge age")]
    #[test_case(json!("151"), Granularity::AgeBand { width: 10 } ; "age above bound")]
    #[test_case(json!("AB1 2CD"), Granularity::ZipPrefix { digits: 3 } ; "non numeric zip")]
    fn test_type_mismatch(input: Value, granularity: Granularity) {
        assert!(matches!(
            generalize(&input, &granularity),
            Err(DeidError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_idempotent() {
        for (input, granularity) in [
            (json!("1980-05-01"), Granularity::Year),
            (json!("1980-05-01"), Granularity::Month),
            (json!(37), Granularity::AgeBand { width: 5 }),
            (json!("02139"), Granularity::ZipPrefix { digits: 3 }),
        ] {
            let once = generalize(&input, &granularity).unwrap();
            assert_eq!(generalize(&once, &granularity).unwrap(), once);
        }
    }
}
