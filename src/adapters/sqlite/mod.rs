//! SQLite integration
//!
//! Used both as a source backend (an existing database file) and as the
//! control store (`state.database_url = "sqlite://..."`).

pub mod connection;
pub mod source;
pub mod store;
pub mod type_mapping;

pub use connection::{quote_identifier, SqlitePoolSettings};
pub use source::SqliteSource;
pub use store::SqliteStore;
pub use type_mapping::map_sqlite_type;
