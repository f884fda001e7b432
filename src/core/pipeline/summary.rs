//! Run summary and reporting

use crate::domain::{RowError, RunRecord, RunStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Summary of a finished (or in-flight) run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run id
    pub run_id: String,

    /// Status name
    pub status: RunStatus,

    /// Source table
    pub table: String,

    /// Rows read
    pub rows_scanned: u64,

    /// Rows with at least one changed field, or dropped
    pub rows_modified: u64,

    /// Rows with at least one row-level error
    pub rows_failed: u64,

    /// Changed values per column
    pub fields_modified: BTreeMap<String, u64>,

    /// Batches committed so far
    pub batches_committed: u64,

    /// Wall-clock duration
    #[serde(with = "duration_secs")]
    pub duration: Duration,

    /// Failure cause, `cancelled` for a cancelled run
    pub error_detail: Option<String>,

    /// Logged row-level errors
    pub errors: Vec<RowError>,

    /// Row-level errors beyond the log cap
    pub errors_dropped: u64,
}

impl RunSummary {
    /// Builds a summary from a run snapshot
    pub fn from_record(record: &RunRecord) -> Self {
        let duration = record
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default();

        Self {
            run_id: record.id.to_string(),
            status: record.status,
            table: record.request.table.clone(),
            rows_scanned: record.counters.rows_scanned,
            rows_modified: record.counters.rows_modified,
            rows_failed: record.counters.rows_failed,
            fields_modified: record.counters.fields_modified.clone(),
            batches_committed: record
                .checkpoint
                .as_ref()
                .map(|c| c.batches_committed)
                .unwrap_or(0),
            duration,
            error_detail: record.error_detail.clone(),
            errors: record.errors.clone(),
            errors_dropped: record.errors_dropped,
        }
    }

    /// Whether the run stopped on request
    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Failed
            && self.error_detail.as_deref() == Some(crate::domain::run::CANCELLED_DETAIL)
    }

    /// Process exit code: 0 completed, 2 cancelled, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Failed if self.is_cancelled() => 2,
            _ => 1,
        }
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            run_id = %self.run_id,
            status = %self.status,
            table = %self.table,
            rows_scanned = self.rows_scanned,
            rows_modified = self.rows_modified,
            rows_failed = self.rows_failed,
            batches = self.batches_committed,
            duration_secs = self.duration.as_secs(),
            "Run finished"
        );

        if let Some(detail) = &self.error_detail {
            tracing::warn!(run_id = %self.run_id, detail = %detail, "Run did not complete");
        }

        if !self.errors.is_empty() {
            tracing::warn!(
                run_id = %self.run_id,
                error_count = self.errors.len() as u64 + self.errors_dropped,
                "Run completed with row-level errors"
            );
            for error in &self.errors {
                tracing::warn!(
                    column = %error.column,
                    kind = %error.kind,
                    message = %error.message,
                    "Row error"
                );
            }
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
