//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Deid using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Deid - Healthcare data de-identification engine
#[derive(Parser, Debug)]
#[command(name = "deid")]
#[command(version, about, long_about = None)]
#[command(author = "Deid Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "deid.toml", env = "DEID_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "DEID_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP interface
    Serve(commands::serve::ServeArgs),

    /// De-identify a table and wait for the run to finish
    Process(commands::process::ProcessArgs),

    /// Resume a cancelled, failed or interrupted run from its checkpoint
    Resume(commands::resume::ResumeArgs),

    /// Show recent runs or a single run
    Status(commands::status::StatusArgs),

    /// List the tables of a connection
    Tables(commands::tables::TablesArgs),

    /// List the columns of a table
    Columns(commands::columns::ColumnsArgs),

    /// Sample a table and report columns that look like PHI
    Scan(commands::scan::ScanArgs),

    /// Write the CSV report of a run
    Report(commands::report::ReportArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

impl Commands {
    /// Whether the command reads the configuration file for logging setup
    pub fn uses_config(&self) -> bool {
        !matches!(self, Commands::Init(_))
    }
}
