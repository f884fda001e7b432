//! Report command implementation

use crate::cli::commands::open;
use crate::core::report::write_report;
use crate::domain::RunId;
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;

/// Arguments for the report command
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Run id
    pub run_id: String,

    /// CSV path; defaults to `<run_id>.csv`
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ReportArgs {
    /// Execute the report command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let id = match RunId::from_str(&self.run_id) {
            Ok(id) => id,
            Err(e) => {
                println!("❌ {e}");
                return Ok(1);
            }
        };
        let (_config, service) = match open(config_path).await {
            Ok(opened) => opened,
            Err(code) => return Ok(code),
        };

        let record = match service.tracker().get(&id).await {
            Ok(r) => r,
            Err(e) => {
                println!("❌ {}", e.public_message());
                return Ok(1);
            }
        };

        let path = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{id}.csv")));
        write_report(&record, &path)?;
        println!("📄 Report written to {}", path.display());
        Ok(0)
    }
}
