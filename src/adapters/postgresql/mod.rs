//! PostgreSQL integration
//!
//! Provides a source backend for PostgreSQL databases and a control store
//! implementation, both over a deadpool connection pool.

pub mod client;
pub mod source;
pub mod store;

pub use client::{PgPoolSettings, PostgreSQLClient};
pub use source::PostgreSQLSource;
pub use store::PostgreSQLStore;
