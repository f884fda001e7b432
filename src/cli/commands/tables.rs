//! Tables command implementation

use crate::cli::commands::{open, EXIT_CONFIG};
use crate::domain::ConnectionId;
use clap::Args;

/// Arguments for the tables command
#[derive(Args, Debug)]
pub struct TablesArgs {
    /// Connection id
    pub connection: String,
}

impl TablesArgs {
    /// Execute the tables command
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

        match service.inspector().list_tables(&id).await {
            Ok(tables) => {
                for table in tables {
                    println!("{table}");
                }
                Ok(0)
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Listing tables failed");
                println!("❌ {}", e.public_message());
                Ok(1)
            }
        }
    }
}
