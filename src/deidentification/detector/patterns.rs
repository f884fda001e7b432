//! Pattern library for PHI detection

use super::PhiCategory;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Pattern definition from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct PatternDefinition {
    /// Regex patterns for this category
    pub patterns: Vec<String>,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// PHI category label
    pub category: String,
}

/// Compiled pattern with metadata
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// Compiled regex
    pub regex: Regex,
    /// PHI category
    pub category: PhiCategory,
    /// Confidence score
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
struct PatternLibrary {
    patterns: BTreeMap<String, PatternDefinition>,
}

/// Compiled pattern library
pub struct PatternRegistry {
    patterns: Vec<CompiledPattern>,
}

impl PatternRegistry {
    /// Loads a pattern library from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read pattern library: {}",
                path.as_ref().display()
            )
        })?;

        Self::from_toml(&content)
    }

    /// Compiles a pattern library from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let library: PatternLibrary =
            toml::from_str(content).context("Failed to parse pattern library TOML")?;

        let mut patterns = Vec::new();
        for (name, def) in library.patterns {
            let category: PhiCategory = def.category.parse().with_context(|| {
                format!("Invalid category in pattern '{}': {}", name, def.category)
            })?;
            if !(0.0..=1.0).contains(&def.confidence) {
                anyhow::bail!(
                    "Pattern '{name}' has confidence {} outside 0.0-1.0",
                    def.confidence
                );
            }

            for pattern_str in &def.patterns {
                let regex = Regex::new(pattern_str)
                    .with_context(|| format!("Invalid regex in pattern '{name}': {pattern_str}"))?;
                patterns.push(CompiledPattern {
                    regex,
                    category,
                    confidence: def.confidence,
                });
            }
        }

        Ok(Self { patterns })
    }

    /// Built-in library
    pub fn default_patterns() -> Result<Self> {
        Self::from_toml(include_str!("../../../patterns/phi_patterns.toml"))
    }

    /// All compiled patterns
    pub fn all_patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// Source regexes of one category, for building a redaction rule
    pub fn sources_for(&self, category: PhiCategory) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| p.category == category)
            .map(|p| p.regex.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        let registry = PatternRegistry::default_patterns().unwrap();
        assert!(!registry.all_patterns().is_empty());
        assert!(!registry.sources_for(PhiCategory::Ssn).is_empty());
        assert!(!registry.sources_for(PhiCategory::Email).is_empty());
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let toml = r#"
[patterns.mystery]
category = "horoscope"
confidence = 0.9
patterns = ['\d+']
"#;
        let err = PatternRegistry::from_toml(toml).err().unwrap();
        assert!(format!("{err:#}").contains("horoscope"));
    }

    #[test]
    fn test_bad_regex_is_rejected() {
        let toml = r#"
[patterns.broken]
category = "ssn"
confidence = 0.9
patterns = ['(\d+']
"#;
        assert!(PatternRegistry::from_toml(toml).is_err());
    }
}
