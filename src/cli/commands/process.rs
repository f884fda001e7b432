//! Process command implementation
//!
//! Dispatches a run, waits for it and prints the summary. Ctrl+C cancels the
//! run after its current batch.

use crate::cli::commands::{open, EXIT_CONFIG, EXIT_FATAL};
use crate::core::pipeline::{RunCoordinator, RunSummary};
use crate::core::report::write_report;
use crate::domain::{ConnectionId, DeidError, MappingId, RuleId, RunId, RunRecord, RunRequest};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Arguments for the process command
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Connection id
    #[arg(long)]
    pub connection: String,

    /// Patient table
    #[arg(long)]
    pub table: String,

    /// Patient identifier column
    #[arg(long)]
    pub patient_id_field: String,

    /// Rule ids, in application order (repeat or comma-separate)
    #[arg(long = "rule", value_delimiter = ',', required = true)]
    pub rules: Vec<String>,

    /// Field mapping ids (repeat or comma-separate)
    #[arg(long = "mapping", value_delimiter = ',')]
    pub mappings: Vec<String>,

    /// Pseudonym template for the patient id, for example `SW{:07d}`
    #[arg(long)]
    pub patient_id_format: Option<String>,

    /// Run name
    #[arg(long)]
    pub name: Option<String>,

    /// Connection the de-identified table is written to (new_table sink)
    #[arg(long)]
    pub destination: Option<String>,

    /// Also write a CSV report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl ProcessArgs {
    fn request(&self) -> Result<RunRequest, DeidError> {
        let rule_ids = self
            .rules
            .iter()
            .map(|r| RuleId::new(r.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DeidError::Validation)?;
        let mapping_ids = self
            .mappings
            .iter()
            .map(|m| MappingId::new(m.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DeidError::Validation)?;
        let destination_connection_id = self
            .destination
            .as_deref()
            .map(ConnectionId::new)
            .transpose()
            .map_err(DeidError::Validation)?;

        Ok(RunRequest {
            connection_id: ConnectionId::new(self.connection.as_str())
                .map_err(DeidError::Validation)?,
            table: self.table.clone(),
            patient_id_field: self.patient_id_field.clone(),
            rule_ids,
            mapping_ids,
            patient_id_format: self.patient_id_format.clone(),
            name: self.name.clone(),
            destination_connection_id,
        })
    }

    /// Execute the process command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(connection = %self.connection, table = %self.table, "Starting process command");

        let request = match self.request() {
            Ok(r) => r,
            Err(e) => {
                println!("❌ {}", e.public_message());
                return Ok(EXIT_CONFIG);
            }
        };

        let (_config, service) = match open(config_path).await {
            Ok(opened) => opened,
            Err(code) => return Ok(code),
        };
        let coordinator = service.coordinator().clone();

        let run_id = match coordinator.dispatch(request).await {
            Ok(id) => id,
            Err(e) => {
                println!("❌ Run rejected: {}", e.public_message());
                return Ok(match e {
                    DeidError::Connection(_)
                    | DeidError::Storage(_)
                    | DeidError::Timeout(_)
                    | DeidError::Io(_)
                    | DeidError::Serialization(_) => EXIT_FATAL,
                    _ => EXIT_CONFIG,
                });
            }
        };
        println!("🚀 Run {run_id} started");

        let record = wait_with_cancel(&coordinator, &run_id, shutdown_signal).await?;
        finish(&record, self.report.as_deref())
    }
}

/// Waits for a run, cancelling it when the shutdown signal fires
pub(crate) async fn wait_with_cancel(
    coordinator: &Arc<RunCoordinator>,
    run_id: &RunId,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<RunRecord> {
    let wait = coordinator.wait(run_id);
    tokio::pin!(wait);
    let mut watching = true;

    loop {
        tokio::select! {
            record = &mut wait => return Ok(record?),
            changed = shutdown.changed(), if watching => match changed {
                Ok(()) if *shutdown.borrow() => {
                    println!("\n⚠️  Cancelling run {run_id} after the current batch...");
                    if let Err(e) = coordinator.cancel(run_id).await {
                        tracing::debug!(run_id = %run_id, error = %e, "Cancel after finish");
                    }
                    watching = false;
                }
                Ok(()) => {}
                Err(_) => watching = false,
            },
        }
    }
}

/// Prints the summary, writes the optional report and picks the exit code
pub(crate) fn finish(record: &RunRecord, report: Option<&std::path::Path>) -> anyhow::Result<i32> {
    let summary = RunSummary::from_record(record);
    print_summary(&summary);

    if let Some(path) = report {
        write_report(record, path)?;
        println!("📄 Report written to {}", path.display());
    }

    Ok(summary.exit_code())
}

/// Human-readable run summary
pub(crate) fn print_summary(summary: &RunSummary) {
    let icon = match summary.exit_code() {
        0 => "✅",
        2 => "⏸️ ",
        _ => "❌",
    };
    println!();
    println!("{icon} Run {} {}", summary.run_id, summary.status);
    println!("   Table:          {}", summary.table);
    println!("   Rows scanned:   {}", summary.rows_scanned);
    println!("   Rows modified:  {}", summary.rows_modified);
    println!("   Rows failed:    {}", summary.rows_failed);
    println!("   Batches:        {}", summary.batches_committed);
    println!("   Duration:       {:.1}s", summary.duration.as_secs_f64());
    for (column, count) in &summary.fields_modified {
        println!("   Field {column}: {count} modified");
    }
    if let Some(detail) = &summary.error_detail {
        println!("   Detail:         {detail}");
    }
    if summary.errors_dropped > 0 || !summary.errors.is_empty() {
        println!(
            "   Row errors:     {} ({} not logged)",
            summary.errors.len() as u64 + summary.errors_dropped,
            summary.errors_dropped
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ProcessArgs {
        ProcessArgs {
            connection: "clinic".to_string(),
            table: "patients".to_string(),
            patient_id_field: "mrn".to_string(),
            rules: vec!["mask-name".to_string(), " shift-dob".to_string()],
            mappings: vec![],
            patient_id_format: Some("SW{:07d}".to_string()),
            name: None,
            destination: None,
            report: None,
        }
    }

    #[test]
    fn test_request_from_args() {
        let request = args().request().unwrap();
        assert_eq!(request.connection_id.as_str(), "clinic");
        assert_eq!(request.rule_ids.len(), 2);
        assert_eq!(request.rule_ids[1].as_str(), "shift-dob");
    }

    #[test]
    fn test_request_rejects_bad_connection_id() {
        let mut bad = args();
        bad.connection = "clinic; drop".to_string();
        assert!(matches!(bad.request(), Err(DeidError::Validation(_))));
    }
}
