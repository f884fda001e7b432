//! CSV run reports

use crate::core::pipeline::RunSummary;
use crate::domain::{Result, RunRecord};
use serde::Serialize;
use std::io;
use std::path::Path;

/// One `metric,value` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    /// Metric name
    pub metric: String,
    /// Rendered value
    pub value: String,
}

impl ReportRow {
    fn new(metric: impl Into<String>, value: impl ToString) -> Self {
        Self {
            metric: metric.into(),
            value: value.to_string(),
        }
    }
}

/// Report lines for a run, in output order
pub fn report_rows(record: &RunRecord) -> Vec<ReportRow> {
    let summary = RunSummary::from_record(record);
    let mut rows = vec![
        ReportRow::new("run_id", &summary.run_id),
        ReportRow::new("status", summary.status),
        ReportRow::new("table", &summary.table),
        ReportRow::new("rows_scanned", summary.rows_scanned),
        ReportRow::new("rows_modified", summary.rows_modified),
        ReportRow::new("rows_failed", summary.rows_failed),
        ReportRow::new(
            "duration_seconds",
            format!("{:.3}", summary.duration.as_secs_f64()),
        ),
    ];
    if let Some(detail) = &summary.error_detail {
        rows.push(ReportRow::new("error_detail", detail));
    }
    for (column, count) in &summary.fields_modified {
        rows.push(ReportRow::new(format!("field_modified:{column}"), count));
    }
    rows
}

fn write_rows<W: io::Write>(writer: W, rows: &[ReportRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Renders the metric/value CSV for a run
pub fn render_report(record: &RunRecord) -> Result<String> {
    let mut buffer = Vec::new();
    write_rows(&mut buffer, &report_rows(record))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::domain::DeidError::Serialization(e.to_string()))
}

/// Writes the report for `record` to `path`
pub fn write_report(record: &RunRecord, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_rows(std::fs::File::create(path)?, &report_rows(record))?;
    tracing::info!(run_id = %record.id, path = %path.display(), "Wrote run report");
    Ok(())
}
