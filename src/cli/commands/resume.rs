//! Resume command implementation

use crate::cli::commands::process::{finish, wait_with_cancel};
use crate::cli::commands::{open, EXIT_CONFIG, EXIT_FATAL};
use crate::domain::{DeidError, RunId};
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::watch;

/// Arguments for the resume command
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Run id of a FAILED run
    pub run_id: String,

    /// Also write a CSV report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl ResumeArgs {
    /// Execute the resume command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let run_id = match RunId::from_str(&self.run_id) {
            Ok(id) => id,
            Err(e) => {
                println!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let (_config, service) = match open(config_path).await {
            Ok(opened) => opened,
            Err(code) => return Ok(code),
        };
        let coordinator = service.coordinator().clone();

        if let Err(e) = coordinator.resume(&run_id).await {
            println!("❌ Cannot resume: {}", e.public_message());
            return Ok(match e {
                DeidError::NotFound(_) | DeidError::Validation(_) => EXIT_CONFIG,
                _ => EXIT_FATAL,
            });
        }
        println!("🔁 Run {run_id} resumed");

        let record = wait_with_cancel(&coordinator, &run_id, shutdown_signal).await?;
        finish(&record, self.report.as_deref())
    }
}
