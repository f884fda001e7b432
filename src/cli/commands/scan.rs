//! Scan command implementation

use crate::cli::commands::{open, EXIT_CONFIG};
use crate::domain::ConnectionId;
use clap::Args;

/// Arguments for the scan command
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Connection id
    pub connection: String,

    /// Table name
    pub table: String,

    /// Distinct values sampled per column (defaults to the configured size)
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Print the scan as JSON
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    /// Execute the scan command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let id = match ConnectionId::new(self.connection.as_str()) {
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

        let scan = match service
            .inspector()
            .scan(&id, &self.table, self.sample_size)
            .await
        {
            Ok(scan) => scan,
            Err(e) => {
                println!("❌ {}", e.public_message());
                return Ok(1);
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&scan)?);
            return Ok(0);
        }

        println!(
            "PHI scan of '{}' (up to {} distinct values per column)",
            scan.table, scan.sample_size
        );
        println!();
        println!("{:<32} {:<10} {:<8} {:<40}", "Column", "Type", "Sampled", "Findings");
        println!("{}", "-".repeat(92));
        for column in &scan.columns {
            let findings = if column.categories.is_empty() {
                "-".to_string()
            } else {
                column
                    .categories
                    .iter()
                    .map(|c| format!("{} {:.0}%", c.category, c.frequency * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!(
                "{:<32} {:<10} {:<8} {:<40}",
                column.column,
                column.column_type.as_str(),
                column.sampled,
                findings
            );
            if let Some(suggestion) = &column.suggestion {
                println!("  suggest {} ({})", suggestion.kind.name(), suggestion.reason);
            }
        }

        let flagged = scan.columns.iter().filter(|c| c.phi_detected()).count();
        println!();
        if flagged == 0 {
            println!("✅ No likely PHI found in the sample");
        } else {
            println!("⚠️  {flagged} column(s) look like they hold PHI");
        }
        Ok(0)
    }
}
