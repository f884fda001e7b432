//! Status command implementation
//!
//! Shows one run in detail, or the most recent runs as a table.

use crate::cli::commands::open;
use crate::cli::commands::process::print_summary;
use crate::core::pipeline::RunSummary;
use crate::domain::RunId;
use clap::Args;
use std::str::FromStr;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show a single run
    pub run_id: Option<String>,

    /// Number of recent runs to list
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking run status");

        let (_config, service) = match open(config_path).await {
            Ok(opened) => opened,
            Err(code) => return Ok(code),
        };

        if let Some(raw) = &self.run_id {
            let id = match RunId::from_str(raw) {
                Ok(id) => id,
                Err(e) => {
                    println!("❌ {e}");
                    return Ok(1);
                }
            };
            let record = match service.tracker().get(&id).await {
                Ok(r) => r,
                Err(e) => {
                    println!("❌ {}", e.public_message());
                    return Ok(1);
                }
            };

            if self.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_summary(&RunSummary::from_record(&record));
                for error in &record.errors {
                    println!(
                        "   row {} column {}: [{}] {}",
                        error.row_key, error.column, error.kind, error.message
                    );
                }
            }
            return Ok(0);
        }

        let runs = service.tracker().list(self.limit).await?;
        if self.json {
            let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::from_record).collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            return Ok(0);
        }

        if runs.is_empty() {
            println!("No runs found.");
            println!("Run 'deid process' to start one.");
            return Ok(0);
        }

        println!("📊 Recent runs");
        println!();
        println!(
            "{:<38} {:<10} {:<24} {:>10} {:>10} {:>8} {:<20}",
            "Run ID", "Status", "Table", "Scanned", "Modified", "Failed", "Created"
        );
        println!("{}", "-".repeat(124));
        for run in &runs {
            println!(
                "{:<38} {:<10} {:<24} {:>10} {:>10} {:>8} {:<20}",
                run.id.to_string(),
                run.status.as_str(),
                run.request.table,
                run.counters.rows_scanned,
                run.counters.rows_modified,
                run.counters.rows_failed,
                run.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
        Ok(0)
    }
}
