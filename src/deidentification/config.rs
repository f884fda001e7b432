//! De-identification configuration

use super::detector::{PatternRegistry, PhiDetector};
use crate::config::{secret_string, SecretString};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happens to a field whose rule failed on this row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Leave the field unmodified
    #[default]
    KeepOriginal,
    /// Replace the field with the redaction placeholder
    Redact,
}

/// Rule application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeidentificationConfig {
    /// Row-level failure policy
    #[serde(default)]
    pub on_row_error: RowErrorPolicy,

    /// Pseudonymize the patient id field even when no selected rule targets it
    #[serde(default = "default_pseudonymize_patient_id")]
    pub pseudonymize_patient_id: bool,

    /// HMAC key for source hashes, opaque tokens and date shifts.
    /// When unset, a key is generated once and kept in the control store.
    #[serde(default)]
    pub mapping_key: Option<SecretString>,

    /// Audit logging configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// PHI column scan settings
    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_pseudonymize_patient_id() -> bool {
    true
}

impl Default for DeidentificationConfig {
    fn default() -> Self {
        Self {
            on_row_error: RowErrorPolicy::default(),
            pseudonymize_patient_id: default_pseudonymize_patient_id(),
            mapping_key: None,
            audit: AuditConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl DeidentificationConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        use secrecy::ExposeSecret;

        if let Some(key) = &self.mapping_key {
            if key.expose_secret().as_bytes().len() < 16 {
                anyhow::bail!("deidentification.mapping_key must be at least 16 bytes");
            }
        }

        self.audit.validate().context("Invalid audit configuration")?;
        self.scan.validate().context("Invalid scan configuration")?;

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("DEID_ON_ROW_ERROR") {
            self.on_row_error = match val.to_lowercase().as_str() {
                "keep_original" => RowErrorPolicy::KeepOriginal,
                "redact" => RowErrorPolicy::Redact,
                _ => anyhow::bail!("Invalid DEID_ON_ROW_ERROR: {}", val),
            };
        }

        if let Ok(val) = std::env::var("DEID_PSEUDONYMIZE_PATIENT_ID") {
            self.pseudonymize_patient_id = val
                .parse()
                .context("Invalid DEID_PSEUDONYMIZE_PATIENT_ID value")?;
        }

        if let Ok(val) = std::env::var("DEID_MAPPING_KEY") {
            self.mapping_key = Some(secret_string(val));
        }

        self.audit.apply_env_overrides()?;
        self.scan.apply_env_overrides()?;

        Ok(())
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging
    #[serde(default)]
    pub enabled: bool,

    /// Audit log file path
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,

    /// Use JSON format for audit logs
    #[serde(default = "default_audit_json_format")]
    pub json_format: bool,
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("./audit/deid.log")
}

fn default_audit_json_format() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: default_audit_log_path(),
            json_format: default_audit_json_format(),
        }
    }
}

impl AuditConfig {
    /// Validate audit configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.log_path.as_os_str().is_empty() {
            anyhow::bail!("audit log_path cannot be empty when audit is enabled");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("DEID_AUDIT_ENABLED") {
            self.enabled = val.parse().context("Invalid DEID_AUDIT_ENABLED value")?;
        }

        if let Ok(val) = std::env::var("DEID_AUDIT_LOG_PATH") {
            self.log_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DEID_AUDIT_JSON_FORMAT") {
            self.json_format = val.parse().context("Invalid DEID_AUDIT_JSON_FORMAT value")?;
        }

        Ok(())
    }
}

/// PHI column scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Distinct values sampled per column
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Patterns below this confidence are ignored
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Categories matching a smaller share of the sample are not reported
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f64,

    /// Pattern library replacing the built-in one
    #[serde(default)]
    pub patterns_file: Option<PathBuf>,
}

fn default_sample_size() -> usize {
    1000
}

fn default_confidence_threshold() -> f32 {
    0.7
}

fn default_min_frequency() -> f64 {
    0.1
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            confidence_threshold: default_confidence_threshold(),
            min_frequency: default_min_frequency(),
            patterns_file: None,
        }
    }
}

impl ScanConfig {
    /// Validate scan configuration
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 || self.sample_size > 100_000 {
            anyhow::bail!("scan sample_size must be 1-100000, got {}", self.sample_size);
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!("scan confidence_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..1.0).contains(&self.min_frequency) {
            anyhow::bail!("scan min_frequency must be at least 0.0 and below 1.0");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("DEID_SCAN_SAMPLE_SIZE") {
            self.sample_size = val.parse().context("Invalid DEID_SCAN_SAMPLE_SIZE value")?;
        }

        if let Ok(val) = std::env::var("DEID_SCAN_PATTERNS_FILE") {
            self.patterns_file = Some(PathBuf::from(val));
        }

        Ok(())
    }

    /// Builds the detector these settings describe
    pub fn detector(&self) -> Result<PhiDetector> {
        let registry = match &self.patterns_file {
            Some(path) => PatternRegistry::from_file(path)?,
            None => PatternRegistry::default_patterns()?,
        };
        Ok(PhiDetector::with_registry(registry)
            .with_confidence_threshold(self.confidence_threshold)
            .with_min_frequency(self.min_frequency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeidentificationConfig::default();
        assert_eq!(config.on_row_error, RowErrorPolicy::KeepOriginal);
        assert!(config.pseudonymize_patient_id);
        assert!(config.mapping_key.is_none());
        assert!(!config.audit.enabled);
        assert_eq!(config.scan.sample_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_mapping_key_rejected() {
        let config = DeidentificationConfig {
            mapping_key: Some(secret_string("short".to_string())),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: DeidentificationConfig = toml::from_str(
            r#"
            on_row_error = "redact"
            mapping_key = "0123456789abcdef0123"

            [audit]
            enabled = true
            log_path = "/tmp/deid-audit.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.on_row_error, RowErrorPolicy::Redact);
        assert!(config.audit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_settings_validated() {
        let mut config = DeidentificationConfig::default();
        config.scan.sample_size = 0;
        assert!(config.validate().is_err());

        config.scan.sample_size = 50;
        config.scan.min_frequency = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_patterns_file_replaces_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.toml");
        std::fs::write(
            &path,
            "[patterns.badge]\ncategory = \"facility_id\"\nconfidence = 0.9\npatterns = ['BADGE-\\d{4}']\n",
        )
        .unwrap();

        let scan = ScanConfig {
            patterns_file: Some(path),
            ..Default::default()
        };
        let detector = scan.detector().unwrap();
        assert_eq!(detector.registry().all_patterns().len(), 1);
        assert_eq!(detector.detect("BADGE-0042").len(), 1);
        assert!(detector.detect("123-45-6789").is_empty());
    }
}
