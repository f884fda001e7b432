//! Columns command implementation

use crate::cli::commands::{open, EXIT_CONFIG};
use crate::domain::ConnectionId;
use clap::Args;

/// Arguments for the columns command
#[derive(Args, Debug)]
pub struct ColumnsArgs {
    /// Connection id
    pub connection: String,

    /// Table name
    pub table: String,
}

impl ColumnsArgs {
    /// Execute the columns command
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

        match service.inspector().list_columns(&id, &self.table).await {
            Ok(columns) => {
                println!("{:<32} {:<10} {:<20} {:<8} {:<4}", "Column", "Type", "Native", "Null", "PK");
                println!("{}", "-".repeat(78));
                for column in columns {
                    println!(
                        "{:<32} {:<10} {:<20} {:<8} {:<4}",
                        column.name,
                        column.column_type.as_str(),
                        column.native_type,
                        if column.nullable { "yes" } else { "no" },
                        if column.primary_key { "yes" } else { "" }
                    );
                }
                Ok(0)
            }
            Err(e) => {
                println!("❌ {}", e.public_message());
                Ok(1)
            }
        }
    }
}
