//! Run records and checkpoints
//!
//! A [`RunRecord`] is the persisted state of one processing run: what was asked
//! for, where it got to, and how it ended. Its [`Checkpoint`] is the last
//! committed batch key, which is what makes resume possible.

use crate::domain::ids::{ConnectionId, MappingId, RuleId, RunId};
use crate::domain::mapping::FieldMapping;
use crate::domain::{DeidError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Detail recorded on runs stopped on request
pub const CANCELLED_DETAIL: &str = "cancelled";

/// Detail recorded on runs found RUNNING at startup
pub const INTERRUPTED_DETAIL: &str = "interrupted";

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Accepted, not yet started
    #[default]
    Pending,
    /// Processing batches
    Running,
    /// All batches processed
    Completed,
    /// Stopped by a systemic error or on request
    Failed,
}

impl RunStatus {
    /// Upper-case status name
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Whether no further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DeidError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(DeidError::Serialization(format!(
                "Unknown run status '{other}'"
            ))),
        }
    }
}

/// What the operator asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source connection
    pub connection_id: ConnectionId,
    /// Table to process
    pub table: String,
    /// Patient identifier column
    pub patient_id_field: String,
    /// Rules in application order
    #[serde(default)]
    pub rule_ids: Vec<RuleId>,
    /// Saved field mappings
    #[serde(default)]
    pub mapping_ids: Vec<MappingId>,
    /// `PREFIX{:0Nd}` template for the implicit patient id mapping
    #[serde(default)]
    pub patient_id_format: Option<String>,
    /// Optional label
    #[serde(default)]
    pub name: Option<String>,
    /// Connection the new_table sink writes to, when not the source itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_connection_id: Option<ConnectionId>,
}

/// Last committed position of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Column batches are ordered by
    pub key_column: String,
    /// Largest key value of the last committed batch
    pub last_key: Value,
    /// Committed batch count
    pub batches_committed: u64,
    /// When the checkpoint was written
    pub updated_at: DateTime<Utc>,
}

/// One recorded row-level failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// Batch key of the failing row
    pub row_key: Value,
    /// Column whose rule chain failed
    pub column: String,
    /// Rule that failed, if any
    pub rule_id: Option<RuleId>,
    /// Error kind, e.g. `type_mismatch`
    pub kind: String,
    /// Message (never contains the field value)
    pub message: String,
}

/// Counters accumulated over committed batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Rows read from the source
    pub rows_scanned: u64,
    /// Rows with at least one changed field, or removed
    pub rows_modified: u64,
    /// Rows with at least one row-level failure
    pub rows_failed: u64,
    /// Changed-value count per column
    pub fields_modified: BTreeMap<String, u64>,
}

impl RunCounters {
    /// Adds another set of counters
    pub fn merge(&mut self, other: &RunCounters) {
        self.rows_scanned += other.rows_scanned;
        self.rows_modified += other.rows_modified;
        self.rows_failed += other.rows_failed;
        for (field, count) in &other.fields_modified {
            *self.fields_modified.entry(field.clone()).or_insert(0) += count;
        }
    }
}

/// Persisted state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub id: RunId,
    /// The request as submitted
    pub request: RunRequest,
    /// Resolved field mappings (saved and implicit)
    pub mappings: Vec<FieldMapping>,
    /// Lifecycle status
    pub status: RunStatus,
    /// Accumulated counters
    #[serde(flatten)]
    pub counters: RunCounters,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Most recent start (or resume)
    pub started_at: Option<DateTime<Utc>>,
    /// Completion or failure time
    pub ended_at: Option<DateTime<Utc>>,
    /// Human-readable cause for FAILED runs
    pub error_detail: Option<String>,
    /// Last committed position
    pub checkpoint: Option<Checkpoint>,
    /// Row-level failures, capped
    #[serde(default)]
    pub errors: Vec<RowError>,
    /// Row-level failures not kept because the cap was reached
    #[serde(default)]
    pub errors_dropped: u64,
}

impl RunRecord {
    /// Creates a PENDING record for a validated request
    pub fn pending(id: RunId, request: RunRequest, mappings: Vec<FieldMapping>) -> Self {
        Self {
            id,
            request,
            mappings,
            status: RunStatus::Pending,
            counters: RunCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error_detail: None,
            checkpoint: None,
            errors: Vec::new(),
            errors_dropped: 0,
        }
    }

    /// PENDING → RUNNING
    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.error_detail = None;
    }

    /// RUNNING → COMPLETED
    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.ended_at = Some(Utc::now());
        self.error_detail = None;
    }

    /// RUNNING → FAILED with a cause
    pub fn mark_failed(&mut self, detail: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error_detail = Some(detail.into());
    }

    /// RUNNING → FAILED, distinguishable from an error
    pub fn mark_cancelled(&mut self) {
        self.mark_failed(CANCELLED_DETAIL);
    }

    /// Re-arms a FAILED run for resume; counters and checkpoint are kept
    ///
    /// # Errors
    ///
    /// Returns `Validation` unless the run is FAILED.
    pub fn prepare_resume(&mut self) -> Result<()> {
        if self.status != RunStatus::Failed {
            return Err(DeidError::Validation(format!(
                "Run {} is {} and cannot be resumed; only FAILED runs can",
                self.id, self.status
            )));
        }
        self.status = RunStatus::Pending;
        self.ended_at = None;
        self.error_detail = None;
        Ok(())
    }

    /// Whether the run was stopped on request
    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Failed
            && self.error_detail.as_deref() == Some(CANCELLED_DETAIL)
    }

    /// Records a committed batch: counters, errors and the new checkpoint
    pub fn record_batch(
        &mut self,
        counters: &RunCounters,
        errors: Vec<RowError>,
        checkpoint: Checkpoint,
        max_errors: usize,
    ) {
        self.counters.merge(counters);
        for error in errors {
            if self.errors.len() < max_errors {
                self.errors.push(error);
            } else {
                self.errors_dropped += 1;
            }
        }
        self.checkpoint = Some(checkpoint);
    }

    /// Wall-clock duration, if the run has started
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - start)
    }
}
