// Deid - Healthcare data de-identification engine
// Copyright (c) 2025 Deid Contributors
// Licensed under the MIT License

//! # Deid - Healthcare data de-identification
//!
//! Deid reads patient tables from registered PostgreSQL or SQLite sources,
//! applies an ordered set of de-identification rules to every row and writes
//! the result to a sibling table, back in place, or to JSON Lines files.
//!
//! ## Overview
//!
//! - **Catalog**: connections, rules and field mappings live in a control store
//! - **Rules**: REDACT, MASK, GENERALIZE, DATE_SHIFT, PSEUDONYMIZE, SUPPRESS
//! - **Pseudonyms**: stable, per-domain and injective across runs
//! - **Runs**: batched, checkpointed after every committed batch, resumable
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`server`] - HTTP interface
//! - [`core`] - Run coordination, batches, sinks, mapping store, reports
//! - [`deidentification`] - Rule engine, keyed derivations, PHI scanner and audit log
//! - [`adapters`] - Source backends and control stores
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deid::config::load_config;
//! use deid::core::service::DeidService;
//! use deid::domain::{ConnectionId, RuleId, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("deid.toml")?;
//!     let service = DeidService::start(&config).await?;
//!
//!     let run_id = service
//!         .coordinator()
//!         .dispatch(RunRequest {
//!             connection_id: ConnectionId::new("clinic")?,
//!             table: "patients".to_string(),
//!             patient_id_field: "mrn".to_string(),
//!             rule_ids: vec![RuleId::new("mask-name")?],
//!             mapping_ids: vec![],
//!             patient_id_format: None,
//!             name: None,
//!             destination_connection_id: None,
//!         })
//!         .await?;
//!
//!     let record = service.coordinator().wait(&run_id).await?;
//!     println!("{} rows modified", record.counters.rows_modified);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Library code returns [`domain::DeidError`]. Every variant has a stable
//! public message that carries no backend detail, used by the HTTP layer.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod deidentification;
pub mod domain;
pub mod logging;
pub mod server;
