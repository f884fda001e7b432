//! Batch pipeline
//!
//! This module provides the processing loop behind every run:
//! - Run plans and per-batch rule application
//! - Output sinks (new table, in place, JSON Lines)
//! - Run coordination, cancellation and resume
//! - Run summaries

pub mod batch;
pub mod coordinator;
pub mod sink;
pub mod summary;

pub use batch::{BatchOutcome, BatchProcessor, FieldPlan, RunPlan, Step};
pub use coordinator::{RunCoordinator, PANIC_DETAIL, PATIENT_ID_MAPPING};
pub use sink::Sink;
pub use summary::RunSummary;
