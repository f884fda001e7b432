//! Core business logic for Deid.
//!
//! This module contains the orchestration behind every de-identification run.
//!
//! # Modules
//!
//! - [`registry`] - Connection catalog and pooled source backends
//! - [`schema`] - Table and column introspection
//! - [`mapping`] - Persistent pseudonym mappings
//! - [`pipeline`] - Run coordination, batch processing and sinks
//! - [`tracker`] - Run snapshots for polling and streaming
//! - [`report`] - CSV run reports
//! - [`retry`] - Backoff for transient storage and sink failures
//! - [`service`] - Wiring shared by the CLI and the HTTP server
//!
//! # Run Workflow
//!
//! 1. **Validate**: connection, table, patient id column, rules and mappings
//! 2. **Persist**: the run is stored as PENDING
//! 3. **Read**: source rows in key order, after the last checkpoint
//! 4. **Transform**: each field through its rule chain
//! 5. **Write**: the batch to the sink, idempotently by key
//! 6. **Checkpoint**: counters and last key, in the run record
//!
//! # Example
//!
//! ```rust,no_run
//! use deid::config::load_config;
//! use deid::core::service::DeidService;
//! use deid::domain::{ConnectionId, RuleId, RunRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("deid.toml")?;
//! let service = DeidService::start(&config).await?;
//!
//! let run_id = service
//!     .coordinator()
//!     .dispatch(RunRequest {
//!         connection_id: ConnectionId::new("clinic")?,
//!         table: "patients".to_string(),
//!         patient_id_field: "mrn".to_string(),
//!         rule_ids: vec![RuleId::new("mask-name")?],
//!         mapping_ids: vec![],
//!         patient_id_format: None,
//!         name: None,
//!         destination_connection_id: None,
//!     })
//!     .await?;
//!
//! let run = service.coordinator().wait(&run_id).await?;
//! println!("{}: {} rows modified", run.status, run.counters.rows_modified);
//! # Ok(())
//! # }
//! ```

pub mod mapping;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod retry;
pub mod schema;
pub mod service;
pub mod tracker;
