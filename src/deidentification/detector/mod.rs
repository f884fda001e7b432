//! PHI detection over sampled column values
//!
//! The scanner reads a bounded sample of distinct values per text column,
//! runs the pattern library over them and reports, per category, how often
//! it matched. Reports carry counts and confidences only; matched values
//! never leave the detector.

pub mod patterns;
pub mod suggest;

pub use patterns::{CompiledPattern, PatternRegistry};
pub use suggest::{suggest_rule, RuleSuggestion};

use crate::domain::{ColumnDescriptor, ColumnType};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kinds of protected health information the pattern library knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiCategory {
    /// Social security number
    Ssn,
    /// Telephone number
    Phone,
    /// Email address
    Email,
    /// Calendar date
    Date,
    /// Patient identifier
    PatientId,
    /// Medical record or encounter number
    MedicalRecord,
    /// NPI, DEA or licence number
    ProviderId,
    /// Insurance member or policy number
    Insurance,
    /// Device serial or UDI
    DeviceId,
    /// Facility or unit number
    FacilityId,
    /// Postal code
    Zipcode,
    /// Street address
    Address,
    /// Stated age
    Age,
    /// Personal name with a title
    Name,
}

impl PhiCategory {
    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            PhiCategory::Ssn => "ssn",
            PhiCategory::Phone => "phone",
            PhiCategory::Email => "email",
            PhiCategory::Date => "date",
            PhiCategory::PatientId => "patient_id",
            PhiCategory::MedicalRecord => "medical_record",
            PhiCategory::ProviderId => "provider_id",
            PhiCategory::Insurance => "insurance",
            PhiCategory::DeviceId => "device_id",
            PhiCategory::FacilityId => "facility_id",
            PhiCategory::Zipcode => "zipcode",
            PhiCategory::Address => "address",
            PhiCategory::Age => "age",
            PhiCategory::Name => "name",
        }
    }
}

impl fmt::Display for PhiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhiCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_lowercase().as_str() {
            "ssn" => PhiCategory::Ssn,
            "phone" => PhiCategory::Phone,
            "email" => PhiCategory::Email,
            "date" => PhiCategory::Date,
            "patient_id" => PhiCategory::PatientId,
            "medical_record" | "mrn" => PhiCategory::MedicalRecord,
            "provider_id" => PhiCategory::ProviderId,
            "insurance" => PhiCategory::Insurance,
            "device_id" => PhiCategory::DeviceId,
            "facility_id" => PhiCategory::FacilityId,
            "zipcode" | "zip" => PhiCategory::Zipcode,
            "address" => PhiCategory::Address,
            "age" => PhiCategory::Age,
            "name" => PhiCategory::Name,
            _ => anyhow::bail!("Unknown PHI category: {s}"),
        })
    }
}

/// How sensitive a column looks from its name alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// No indicator in the name
    None,
    /// Generic identifiers, codes, dates
    Low,
    /// Contact details and names
    Medium,
    /// Direct identifiers
    High,
}

const NAME_INDICATORS: &[(Sensitivity, &[&str])] = &[
    (
        Sensitivity::High,
        &["ssn", "social", "dob", "birth", "license", "patient", "mrn", "medical"],
    ),
    (
        Sensitivity::Medium,
        &["name", "address", "phone", "email", "zip", "postal", "provider", "doctor"],
    ),
    (
        Sensitivity::Low,
        &["id", "number", "date", "code", "location"],
    ),
];

/// Highest sensitivity suggested by a column name, with the words that matched
pub fn name_sensitivity(column: &str) -> (Sensitivity, Vec<String>) {
    let lower = column.to_lowercase();
    let mut level = Sensitivity::None;
    let mut hints = Vec::new();
    for (indicator_level, words) in NAME_INDICATORS {
        for word in words.iter().filter(|w| lower.contains(**w)) {
            hints.push(word.to_string());
            level = level.max(*indicator_level);
        }
    }
    (level, hints)
}

/// Whether a column name suggests narrative text
pub fn is_free_text_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    ["note", "comment", "description", "narrative", "summary", "observation", "text"]
        .iter()
        .any(|w| lower.contains(w))
}

/// One match inside a value; positions only
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhiMatch {
    /// Category
    pub category: PhiCategory,
    /// Byte offset of the match start
    pub start: usize,
    /// Byte offset past the match end
    pub end: usize,
    /// Pattern confidence
    pub confidence: f32,
}

/// Per-category statistics of one column sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Category
    pub category: PhiCategory,
    /// Sampled values with at least one match
    pub values: usize,
    /// Total matches
    pub matches: usize,
    /// `values / sampled`
    pub frequency: f64,
    /// Mean pattern confidence over matches
    pub avg_confidence: f64,
}

/// Scan result of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScan {
    /// Column name
    pub column: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Distinct values sampled
    pub sampled: usize,
    /// Sensitivity suggested by the column name
    pub sensitivity: Sensitivity,
    /// Indicator words found in the column name
    pub name_hints: Vec<String>,
    /// Categories found, most frequent first
    pub categories: Vec<CategoryStats>,
    /// Rule worth configuring for this column, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<RuleSuggestion>,
}

impl ColumnScan {
    /// Whether any category reached the reporting frequency
    pub fn phi_detected(&self) -> bool {
        !self.categories.is_empty()
    }
}

/// Scan result of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScan {
    /// Table name
    pub table: String,
    /// Per-column sample limit used
    pub sample_size: usize,
    /// Scanned columns in ordinal order
    pub columns: Vec<ColumnScan>,
}

/// Regex-based PHI detector
pub struct PhiDetector {
    registry: Arc<PatternRegistry>,
    confidence_threshold: f32,
    min_frequency: f64,
}

impl PhiDetector {
    /// Detector over the built-in pattern library
    pub fn new() -> Result<Self> {
        Ok(Self::with_registry(PatternRegistry::default_patterns()?))
    }

    /// Detector over a custom pattern library
    pub fn with_registry(registry: PatternRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            confidence_threshold: 0.7,
            min_frequency: 0.1,
        }
    }

    /// Patterns below this confidence are skipped
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Categories matching fewer sampled values than this share are dropped
    pub fn with_min_frequency(mut self, min_frequency: f64) -> Self {
        self.min_frequency = min_frequency.clamp(0.0, 1.0);
        self
    }

    /// Pattern library
    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Non-overlapping matches in `text`, higher confidence winning overlaps
    pub fn detect(&self, text: &str) -> Vec<PhiMatch> {
        let mut candidates: Vec<PhiMatch> = Vec::new();
        for pattern in self.registry.all_patterns() {
            if pattern.confidence < self.confidence_threshold {
                continue;
            }
            for found in pattern.regex.find_iter(text) {
                candidates.push(PhiMatch {
                    category: pattern.category,
                    start: found.start(),
                    end: found.end(),
                    confidence: pattern.confidence,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
        });
        let mut accepted: Vec<PhiMatch> = Vec::new();
        for candidate in candidates {
            if accepted
                .iter()
                .all(|m| candidate.end <= m.start || candidate.start >= m.end)
            {
                accepted.push(candidate);
            }
        }
        accepted.sort_by_key(|m| m.start);
        accepted
    }

    /// Aggregates detections over a column sample
    pub fn analyze_column(&self, column: &ColumnDescriptor, samples: &[String]) -> ColumnScan {
        let mut stats: BTreeMap<PhiCategory, (usize, usize, f64)> = BTreeMap::new();
        for value in samples {
            let matches = self.detect(value);
            let mut seen = Vec::new();
            for m in &matches {
                let entry = stats.entry(m.category).or_insert((0, 0, 0.0));
                entry.1 += 1;
                entry.2 += f64::from(m.confidence);
                if !seen.contains(&m.category) {
                    seen.push(m.category);
                    entry.0 += 1;
                }
            }
        }

        let sampled = samples.len();
        let mut categories: Vec<CategoryStats> = stats
            .into_iter()
            .map(|(category, (values, matches, confidence_sum))| CategoryStats {
                category,
                values,
                matches,
                frequency: if sampled == 0 {
                    0.0
                } else {
                    values as f64 / sampled as f64
                },
                avg_confidence: confidence_sum / matches as f64,
            })
            .filter(|s| s.frequency > self.min_frequency)
            .collect();
        categories.sort_by(|a, b| {
            b.frequency
                .total_cmp(&a.frequency)
                .then(b.avg_confidence.total_cmp(&a.avg_confidence))
        });

        let (sensitivity, name_hints) = name_sensitivity(&column.name);
        let mut scan = ColumnScan {
            column: column.name.clone(),
            column_type: column.column_type,
            sampled,
            sensitivity,
            name_hints,
            categories,
            suggestion: None,
        };
        scan.suggestion = suggest_rule(&scan, &self.registry);
        scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn detector() -> PhiDetector {
        PhiDetector::new().unwrap()
    }

    fn categories(text: &str) -> Vec<PhiCategory> {
        detector().detect(text).into_iter().map(|m| m.category).collect()
    }

    #[test_case("123-45-6789", PhiCategory::Ssn; "ssn")]
    #[test_case("Call (555) 123-4567 today", PhiCategory::Phone; "phone")]
    #[test_case("jane.doe@example.com", PhiCategory::Email; "email")]
    #[test_case("DOB 1980-05-01", PhiCategory::Date; "iso date")]
    #[test_case("seen on 05/01/1980", PhiCategory::Date; "us date")]
    #[test_case("MRN: 00012345", PhiCategory::MedicalRecord; "mrn")]
    #[test_case("NPI 1234567890", PhiCategory::ProviderId; "npi")]
    #[test_case("10037", PhiCategory::Zipcode; "zip")]
    #[test_case("lives at 42 Elm Street", PhiCategory::Address; "address")]
    #[test_case("a 67 year old male", PhiCategory::Age; "age")]
    #[test_case("referred by Dr. Jane Smith", PhiCategory::Name; "titled name")]
    fn test_detects_category(text: &str, expected: PhiCategory) {
        assert!(
            categories(text).contains(&expected),
            "{expected} not found in {:?}",
            categories(text)
        );
    }

    #[test]
    fn test_plain_text_has_no_phi() {
        assert!(categories("stable, follow up as needed").is_empty());
    }

    #[test]
    fn test_overlapping_matches_keep_higher_confidence() {
        let matches = detector().detect("SSN: 123-45-6789");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].category, PhiCategory::Ssn);
    }

    #[test]
    fn test_threshold_skips_weak_patterns() {
        let strict = detector().with_confidence_threshold(0.9);
        assert!(strict.detect("a 67 year old male").is_empty());
    }

    #[test]
    fn test_analyze_column_frequencies() {
        let column = ColumnDescriptor::new("contact_email", ColumnType::Text);
        let samples: Vec<String> = vec![
            "a@example.com".into(),
            "b@example.org".into(),
            "c@example.net".into(),
            "unknown".into(),
        ];
        let scan = detector().analyze_column(&column, &samples);

        assert_eq!(scan.sampled, 4);
        assert_eq!(scan.sensitivity, Sensitivity::Medium);
        assert_eq!(scan.categories.len(), 1);
        assert_eq!(scan.categories[0].category, PhiCategory::Email);
        assert_eq!(scan.categories[0].values, 3);
        assert!((scan.categories[0].frequency - 0.75).abs() < 1e-9);

        // No raw value survives into the report
        let json = serde_json::to_string(&scan).unwrap();
        assert!(!json.contains("example.com"));
    }

    #[test]
    fn test_rare_category_is_dropped() {
        let column = ColumnDescriptor::new("remarks", ColumnType::Text);
        let mut samples: Vec<String> = (0..20).map(|i| format!("routine visit {i}")).collect();
        samples.push("123-45-6789".into());
        let scan = detector().analyze_column(&column, &samples);
        assert!(!scan.phi_detected());
        assert!(scan.suggestion.is_none());
    }

    #[test_case("patient_ssn", Sensitivity::High; "direct identifier")]
    #[test_case("home_phone", Sensitivity::Medium; "contact")]
    #[test_case("visit_code", Sensitivity::Low; "generic")]
    #[test_case("ward", Sensitivity::None; "nothing")]
    fn test_name_sensitivity(column: &str, expected: Sensitivity) {
        assert_eq!(name_sensitivity(column).0, expected);
    }

    #[test]
    fn test_category_round_trips_through_text() {
        assert_eq!("mrn".parse::<PhiCategory>().unwrap(), PhiCategory::MedicalRecord);
        assert_eq!(PhiCategory::PatientId.to_string(), "patient_id");
        assert!("horoscope".parse::<PhiCategory>().is_err());
    }
}
