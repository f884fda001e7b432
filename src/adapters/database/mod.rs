//! Database abstraction layer
//!
//! Trait-based abstraction over source databases and the control store, so
//! the pipeline works with any backend kind (PostgreSQL, SQLite).

pub mod factory;
pub mod traits;

pub use factory::{create_control_store, create_source_backend};
pub use traits::{
    BatchQuery, BatchWriteResult, CatalogStorage, ControlStore, MappingStorage, Record,
    RunStorage, SourceBackend, WriteMode, WriteOp, WriteTarget,
};
