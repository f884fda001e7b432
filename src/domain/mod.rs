//! Domain models and types.
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`ConnectionId`], [`RuleId`], [`MappingId`], [`RunId`])
//! - **Catalog models** ([`ConnectionDescriptor`], [`Rule`], [`FieldMapping`])
//! - **Introspection models** ([`TableSchema`], [`ColumnDescriptor`])
//! - **Run state** ([`RunRecord`], [`Checkpoint`])
//! - **Error types** ([`DeidError`]) and the [`Result`] alias
//!
//! # Type Safety
//!
//! ```rust
//! use deid::domain::{ConnectionId, RuleId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = ConnectionId::new("clinic-primary")?;
//! let rule = RuleId::new("mask-name")?;
//!
//! // This won't compile - identifiers are distinct types
//! // let wrong: ConnectionId = rule;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod errors;
pub mod ids;
pub mod mapping;
pub mod result;
pub mod rule;
pub mod run;
pub mod schema;

// Re-export commonly used types for convenience
pub use connection::{
    BackendKind, ConnectionDescriptor, ConnectionSummary, CredentialRef, SslMode,
};
pub use errors::DeidError;
pub use ids::{ConnectionId, MappingId, RuleId, RunId};
pub use mapping::{FieldMapping, PseudonymEntry};
pub use result::Result;
pub use rule::{ColumnSelector, Granularity, PseudonymFormat, Rule, RuleKind, SuppressScope};
pub use run::{Checkpoint, RowError, RunCounters, RunRecord, RunRequest, RunStatus};
pub use schema::{ColumnDescriptor, ColumnType, TableSchema};
