//! Audit logger for de-identification runs

use crate::deidentification::config::AuditConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// One changed field, as seen by the pipeline
#[derive(Debug, Clone)]
pub struct FieldChange {
    /// Batch key of the row
    pub row_key: Value,
    /// Column name
    pub column: String,
    /// Rules applied, in order
    pub rule_ids: Vec<String>,
    /// Value before transformation
    pub original: Value,
}

/// What a committed batch did
#[derive(Debug, Clone)]
pub struct BatchAudit<'a> {
    /// Run id
    pub run_id: &'a str,
    /// Source table
    pub table: &'a str,
    /// Batch sequence number
    pub batch: u64,
    /// Rows dropped by row suppression
    pub rows_dropped: usize,
    /// Time spent transforming and writing
    pub processing_time_ms: u64,
    /// Changed fields
    pub changes: &'a [FieldChange],
}

/// Audit log entry
#[derive(Debug, Serialize)]
struct AuditLogEntry {
    timestamp: String,
    run_id: String,
    table: String,
    batch: u64,
    fields_changed: usize,
    rows_dropped: usize,
    processing_time_ms: u64,
    changes: Vec<AuditChange>,
}

/// Audit change entry (with hashed values)
#[derive(Debug, Serialize)]
struct AuditChange {
    /// SHA-256 of the row key
    row_key_hash: String,
    column: String,
    rules: Vec<String>,
    /// SHA-256 of the original value (never log plaintext PHI)
    value_hash: String,
}

/// Appends one line per committed batch
pub struct AuditLogger {
    log_path: PathBuf,
    json_format: bool,
    enabled: bool,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(config: &AuditConfig) -> Result<Self> {
        if config.enabled {
            if let Some(parent) = config.log_path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create audit log directory: {}", parent.display())
                })?;
            }
        }

        Ok(Self {
            log_path: config.log_path.clone(),
            json_format: config.json_format,
            enabled: config.enabled,
        })
    }

    /// A logger that writes nothing
    pub fn disabled() -> Self {
        Self {
            log_path: PathBuf::new(),
            json_format: true,
            enabled: false,
        }
    }

    /// Whether entries are written
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log a committed batch
    pub fn log_batch(&self, batch: &BatchAudit<'_>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = AuditLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: batch.run_id.to_string(),
            table: batch.table.to_string(),
            batch: batch.batch,
            fields_changed: batch.changes.len(),
            rows_dropped: batch.rows_dropped,
            processing_time_ms: batch.processing_time_ms,
            changes: batch
                .changes
                .iter()
                .map(|c| AuditChange {
                    row_key_hash: hash_value(&c.row_key),
                    column: c.column.clone(),
                    rules: c.rule_ids.clone(),
                    value_hash: hash_value(&c.original),
                })
                .collect(),
        };

        self.write_entry(&entry)
    }

    /// Write an audit entry to the log file
    fn write_entry(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open audit log: {}", self.log_path.display()))?;

        if self.json_format {
            let json_line =
                serde_json::to_string(entry).context("Failed to serialize audit entry")?;
            writeln!(file, "{json_line}").context("Failed to write audit entry")?;
        } else {
            writeln!(
                file,
                "[{}] Run: {} | Table: {} | Batch: {} | Fields: {} | Dropped: {} | Time: {}ms",
                entry.timestamp,
                entry.run_id,
                entry.table,
                entry.batch,
                entry.fields_changed,
                entry.rows_dropped,
                entry.processing_time_ms
            )
            .context("Failed to write audit entry")?;
        }

        Ok(())
    }
}

/// SHA-256 of a value's text form
fn hash_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(path: PathBuf, json_format: bool) -> AuditConfig {
        AuditConfig {
            enabled: true,
            log_path: path,
            json_format,
        }
    }

    #[test]
    fn test_hash_value() {
        assert_eq!(hash_value(&json!("A1234")), hash_value(&json!("A1234")));
        assert_ne!(hash_value(&json!("A1234")), hash_value(&json!("A1235")));
        assert_eq!(hash_value(&json!(5)), hash_value(&json!("5")));
    }

    #[test]
    fn test_log_batch_never_writes_plaintext() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("audit").join("deid.log");
        let logger = AuditLogger::new(&config(log_path.clone(), true)).unwrap();

        let changes = vec![FieldChange {
            row_key: json!("A1234"),
            column: "name".to_string(),
            rule_ids: vec!["mask-name".to_string()],
            original: json!("Jane Doe"),
        }];
        logger
            .log_batch(&BatchAudit {
                run_id: "run-1",
                table: "patients",
                batch: 1,
                rows_dropped: 0,
                processing_time_ms: 12,
                changes: &changes,
            })
            .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("run-1"));
        assert!(content.contains("mask-name"));
        assert!(!content.contains("Jane Doe"));
        assert!(!content.contains("A1234"));

        let entry: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["fields_changed"], 1);
    }

    #[test]
    fn test_plain_text_format() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("deid.log");
        let logger = AuditLogger::new(&config(log_path.clone(), false)).unwrap();

        logger
            .log_batch(&BatchAudit {
                run_id: "run-2",
                table: "visits",
                batch: 3,
                rows_dropped: 2,
                processing_time_ms: 5,
                changes: &[],
            })
            .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("Run: run-2 | Table: visits | Batch: 3"));
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let logger = AuditLogger::disabled();
        assert!(!logger.is_enabled());
        logger
            .log_batch(&BatchAudit {
                run_id: "r",
                table: "t",
                batch: 1,
                rows_dropped: 0,
                processing_time_ms: 0,
                changes: &[],
            })
            .unwrap();
    }
}
