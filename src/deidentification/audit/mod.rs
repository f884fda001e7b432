//! Audit logging module
//!
//! Provides structured audit logging for de-identification runs.

pub mod logger;

pub use logger::{AuditLogger, BatchAudit, FieldChange};
