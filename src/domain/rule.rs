//! De-identification rule definitions
//!
//! A rule is data: a kind tag plus the parameters that kind needs, an optional
//! column-type constraint and a selector saying which table columns it targets.
//! Application lives in [`crate::deidentification`].

use crate::domain::ids::RuleId;
use crate::domain::schema::ColumnType;
use crate::domain::{DeidError, Result};
use serde::{Deserialize, Serialize};

/// Placeholder written by REDACT when none is configured
pub const DEFAULT_PLACEHOLDER: &str = "[REDACTED]";

/// Default REDACT pattern when redacting inside free text (US SSN)
pub const DEFAULT_SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";

/// A catalog rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier
    pub id: RuleId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Kind and kind-specific parameters
    pub kind: RuleKind,

    /// Column types the rule accepts; empty means any
    #[serde(default)]
    pub applies_to: Vec<ColumnType>,

    /// Which columns the rule targets
    #[serde(default)]
    pub selector: ColumnSelector,
}

impl Rule {
    /// Whether the rule accepts a column of the given type
    pub fn accepts_type(&self, column_type: ColumnType) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&column_type)
    }
}

/// Case-insensitive, fully anchored regex patterns over table and column names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelector {
    /// Table name patterns; empty matches every table
    #[serde(default)]
    pub tables: Vec<String>,

    /// Column name patterns; at least one is required
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Rule kinds and their parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Replace the value (or pattern matches inside it) with a placeholder
    Redact {
        /// Replacement text
        #[serde(default = "default_placeholder")]
        placeholder: String,
        /// When non-empty, only matches of these patterns are replaced
        #[serde(default)]
        patterns: Vec<String>,
    },

    /// Keep a prefix and/or suffix, mask the rest
    Mask {
        /// Leading characters left visible
        #[serde(default)]
        keep_prefix: usize,
        /// Trailing characters left visible
        #[serde(default)]
        keep_suffix: usize,
        /// Mask character
        #[serde(default = "default_mask_char")]
        mask_char: char,
        /// Number of mask characters written when `preserve_length` is false
        #[serde(default = "default_mask_width")]
        mask_width: usize,
        /// Mask every hidden character one-for-one instead
        #[serde(default)]
        preserve_length: bool,
    },

    /// Map to a coarser bucket
    Generalize {
        /// Bucket granularity
        granularity: Granularity,
    },

    /// Shift dates by a per-subject offset
    DateShift {
        /// Maximum absolute shift in days
        #[serde(default = "default_max_days")]
        max_days: u32,
        /// Offset domain; subjects shift identically within a domain
        #[serde(default)]
        domain: Option<String>,
    },

    /// Replace with a stable pseudonym from the mapping store
    Pseudonymize {
        /// Mapping domain; defaults to `<table>.<column>`
        #[serde(default)]
        domain: Option<String>,
        /// Token format used when a new pseudonym is created
        #[serde(default)]
        format: PseudonymFormat,
    },

    /// Drop the field or the whole row
    Suppress {
        /// Field or row
        #[serde(default)]
        scope: SuppressScope,
    },
}

impl RuleKind {
    /// Upper-case kind name
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Redact { .. } => "REDACT",
            RuleKind::Mask { .. } => "MASK",
            RuleKind::Generalize { .. } => "GENERALIZE",
            RuleKind::DateShift { .. } => "DATE_SHIFT",
            RuleKind::Pseudonymize { .. } => "PSEUDONYMIZE",
            RuleKind::Suppress { .. } => "SUPPRESS",
        }
    }

    /// Checks kind-specific parameters that don't need compilation
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleParameter` naming the offending parameter.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DeidError::InvalidRuleParameter(msg));

        match self {
            RuleKind::Redact { .. } | RuleKind::Suppress { .. } => Ok(()),
            RuleKind::Mask {
                mask_char,
                mask_width,
                preserve_length,
                ..
            } => {
                if mask_char.is_control() {
                    return invalid("MASK: mask_char must be a printable character".into());
                }
                if !preserve_length && *mask_width == 0 {
                    return invalid(
                        "MASK: mask_width must be > 0 unless preserve_length is set".into(),
                    );
                }
                Ok(())
            }
            RuleKind::Generalize { granularity } => match granularity {
                Granularity::AgeBand { width } if *width == 0 || *width > 100 => {
                    invalid(format!("GENERALIZE: age band width must be 1-100, got {width}"))
                }
                Granularity::ZipPrefix { digits } if *digits == 0 || *digits > 5 => invalid(
                    format!("GENERALIZE: zip prefix digits must be 1-5, got {digits}"),
                ),
                _ => Ok(()),
            },
            RuleKind::DateShift { max_days, domain } => {
                if *max_days == 0 || *max_days > 3650 {
                    return invalid(format!(
                        "DATE_SHIFT: max_days must be 1-3650, got {max_days}"
                    ));
                }
                if domain.as_deref().is_some_and(|d| d.trim().is_empty()) {
                    return invalid("DATE_SHIFT: domain cannot be blank".into());
                }
                Ok(())
            }
            RuleKind::Pseudonymize { domain, format } => {
                if domain.as_deref().is_some_and(|d| d.trim().is_empty()) {
                    return invalid("PSEUDONYMIZE: domain cannot be blank".into());
                }
                format.validate()
            }
        }
    }
}

/// GENERALIZE bucket granularity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Granularity {
    /// Date to `YYYY`
    Year,
    /// Date to `YYYY-MM`
    Month,
    /// Age to `lo-hi` band
    AgeBand {
        /// Band width in years
        width: u32,
    },
    /// Postal code to its first digits plus `X` padding
    ZipPrefix {
        /// Digits kept
        digits: usize,
    },
}

/// How new pseudonyms look
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum PseudonymFormat {
    /// Keyed-hash token, `T` followed by 21 URL-safe base64 characters
    #[default]
    Opaque,
    /// Fixed prefix plus a zero-padded sequence number, e.g. `SW0000001`
    Sequential {
        /// Literal prefix
        prefix: String,
        /// Zero-padded width
        digits: usize,
    },
}

impl PseudonymFormat {
    /// Parses `PREFIX{:0Nd}` style templates such as `SW{:07d}`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleParameter` if the template is not of that shape.
    pub fn from_template(template: &str) -> Result<Self> {
        let err = || {
            DeidError::InvalidRuleParameter(format!(
                "Identifier format '{template}' must look like PREFIX{{:0Nd}}, e.g. SW{{:07d}}"
            ))
        };

        let start = template.find("{:").ok_or_else(err)?;
        let rest = &template[start + 2..];
        let end = rest.find('}').ok_or_else(err)?;
        if start + 2 + end + 1 != template.len() {
            return Err(err());
        }
        let width = &rest[..end];
        let digits = width
            .strip_prefix('0')
            .and_then(|s| s.strip_suffix('d'))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(err)?;

        let format = PseudonymFormat::Sequential {
            prefix: template[..start].to_string(),
            digits,
        };
        format.validate()?;
        Ok(format)
    }

    /// Checks format parameters
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleParameter` for an out-of-range digit count.
    pub fn validate(&self) -> Result<()> {
        match self {
            PseudonymFormat::Opaque => Ok(()),
            PseudonymFormat::Sequential { digits, .. } if *digits == 0 || *digits > 18 => {
                Err(DeidError::InvalidRuleParameter(format!(
                    "Sequential pseudonym digits must be 1-18, got {digits}"
                )))
            }
            PseudonymFormat::Sequential { .. } => Ok(()),
        }
    }
}

/// SUPPRESS scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressScope {
    /// Set the field to NULL
    #[default]
    Field,
    /// Remove the row from the output
    Row,
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

fn default_mask_char() -> char {
    '*'
}

fn default_mask_width() -> usize {
    4
}

fn default_max_days() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_mask_rule_from_toml_uses_defaults() {
        let rule: Rule = toml::from_str(
            r#"
            id = "mask-name"
            kind = { type = "mask", keep_suffix = 2 }
            selector = { columns = ["name"] }
            "#,
        )
        .unwrap();

        assert_eq!(
            rule.kind,
            RuleKind::Mask {
                keep_prefix: 0,
                keep_suffix: 2,
                mask_char: '*',
                mask_width: 4,
                preserve_length: false,
            }
        );
        assert_eq!(rule.kind.name(), "MASK");
        assert!(rule.accepts_type(ColumnType::Numeric));
    }

    #[test]
    fn test_generalize_rule_json_shape() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "dob-year",
            "kind": {"type": "generalize", "granularity": {"unit": "year"}},
            "applies_to": ["date"],
            "selector": {"columns": ["dob"]}
        }))
        .unwrap();
        assert!(rule.accepts_type(ColumnType::Date));
        assert!(!rule.accepts_type(ColumnType::Text));
    }

    #[test_case("SW{:07d}", "SW", 7 ; "patient master format")]
    #[test_case("ENC{:010d}", "ENC", 10 ; "encounter format")]
    #[test_case("{:05d}", "", 5 ; "no prefix")]
    fn test_template_parsing(template: &str, prefix: &str, digits: usize) {
        assert_eq!(
            PseudonymFormat::from_template(template).unwrap(),
            PseudonymFormat::Sequential {
                prefix: prefix.to_string(),
                digits
            }
        );
    }

    #[test_case("SW{:7d}" ; "missing zero pad")]
    #[test_case("SW{:07d}X" ; "trailing text")]
    #[test_case("SW" ; "no placeholder")]
    #[test_case("SW{:030d}" ; "too many digits")]
    fn test_template_rejected(template: &str) {
        assert!(matches!(
            PseudonymFormat::from_template(template),
            Err(DeidError::InvalidRuleParameter(_))
        ));
    }

    #[test]
    fn test_date_shift_zero_days_rejected() {
        let kind = RuleKind::DateShift {
            max_days: 0,
            domain: None,
        };
        assert!(matches!(
            kind.validate(),
            Err(DeidError::InvalidRuleParameter(_))
        ));
    }

    #[test]
    fn test_zip_digits_out_of_range_rejected() {
        let kind = RuleKind::Generalize {
            granularity: Granularity::ZipPrefix { digits: 9 },
        };
        assert!(kind.validate().is_err());
    }

    #[test]
    fn test_zero_width_mask_needs_preserve_length() {
        let kind = RuleKind::Mask {
            keep_prefix: 0,
            keep_suffix: 0,
            mask_char: '*',
            mask_width: 0,
            preserve_length: true,
        };
        assert!(kind.validate().is_ok());
    }
}
