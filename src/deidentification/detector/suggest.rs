//! Rule suggestions from column scans

use super::{is_free_text_column, ColumnScan, PatternRegistry, PhiCategory};
use crate::domain::rule::DEFAULT_PLACEHOLDER;
use crate::domain::{Granularity, PseudonymFormat, RuleKind};
use serde::{Deserialize, Serialize};

/// A rule kind worth configuring for a scanned column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSuggestion {
    /// Category the suggestion is based on; `None` for free-text redaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<PhiCategory>,
    /// Suggested rule kind with parameters
    pub kind: RuleKind,
    /// Human-readable reason
    pub reason: String,
}

/// Suggests a rule for a scanned column, or `None` when nothing was found
pub fn suggest_rule(scan: &ColumnScan, registry: &PatternRegistry) -> Option<RuleSuggestion> {
    if scan.categories.is_empty() {
        return None;
    }

    // Narrative columns keep their text; only the detected spans go
    if is_free_text_column(&scan.column) {
        let patterns = scan
            .categories
            .iter()
            .flat_map(|s| registry.sources_for(s.category))
            .collect();
        let found: Vec<&str> = scan.categories.iter().map(|s| s.category.as_str()).collect();
        return Some(RuleSuggestion {
            category: None,
            kind: RuleKind::Redact {
                placeholder: DEFAULT_PLACEHOLDER.to_string(),
                patterns,
            },
            reason: format!("Free-text column containing {}", found.join(", ")),
        });
    }

    let dominant = scan.categories.iter().max_by(|a, b| {
        (a.frequency * a.avg_confidence).total_cmp(&(b.frequency * b.avg_confidence))
    })?;

    let kind = match dominant.category {
        PhiCategory::Ssn
        | PhiCategory::PatientId
        | PhiCategory::MedicalRecord
        | PhiCategory::ProviderId
        | PhiCategory::Insurance
        | PhiCategory::DeviceId
        | PhiCategory::FacilityId
        | PhiCategory::Name
        | PhiCategory::Address => RuleKind::Pseudonymize {
            domain: None,
            format: PseudonymFormat::Opaque,
        },
        PhiCategory::Phone | PhiCategory::Email => RuleKind::Mask {
            keep_prefix: 0,
            keep_suffix: 0,
            mask_char: '*',
            mask_width: 4,
            preserve_length: false,
        },
        PhiCategory::Date => RuleKind::DateShift {
            max_days: 30,
            domain: None,
        },
        PhiCategory::Zipcode => RuleKind::Generalize {
            granularity: Granularity::ZipPrefix { digits: 3 },
        },
        PhiCategory::Age => RuleKind::Generalize {
            granularity: Granularity::AgeBand { width: 10 },
        },
    };

    Some(RuleSuggestion {
        category: Some(dominant.category),
        reason: format!(
            "{} found in {:.0}% of {} sampled values",
            dominant.category,
            dominant.frequency * 100.0,
            scan.sampled
        ),
        kind,
    })
}
