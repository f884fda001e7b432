//! CLI command implementations
//!
//! Exit codes: 0 success, 1 run FAILED, 2 run cancelled or interrupted,
//! 3 configuration error, 5 fatal error.

pub mod columns;
pub mod init;
pub mod process;
pub mod report;
pub mod resume;
pub mod scan;
pub mod serve;
pub mod status;
pub mod tables;
pub mod validate;

use crate::config::{load_config, DeidConfig};
use crate::core::service::DeidService;

/// Exit code for configuration errors
pub const EXIT_CONFIG: i32 = 3;

/// Exit code for fatal errors
pub const EXIT_FATAL: i32 = 5;

/// Loads the configuration, printing the failure and returning the exit code
pub(crate) fn load(config_path: &str) -> Result<DeidConfig, i32> {
    load_config(config_path).map_err(|e| {
        println!("❌ Failed to load configuration file");
        println!("   Error: {e}");
        EXIT_CONFIG
    })
}

/// Loads the configuration and starts the service
pub(crate) async fn open(config_path: &str) -> Result<(DeidConfig, DeidService), i32> {
    let config = load(config_path)?;
    match DeidService::start(&config).await {
        Ok(service) => Ok((config, service)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start service");
            println!("❌ Failed to open the control store");
            println!("   Error: {}", e.public_message());
            Err(EXIT_FATAL)
        }
    }
}
