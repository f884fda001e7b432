//! Configuration management.
//!
//! Configuration is a TOML file (`deid.toml` by default) with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `DEID_*` environment overrides
//! - Default values for every optional setting
//! - Per-section validation
//!
//! # Example Configuration
//!
//! ```toml
//! [state]
//! database_url = "sqlite://deid_state.db"
//!
//! [pipeline]
//! batch_size = 1000
//!
//! [pipeline.sink]
//! mode = "new_table"
//!
//! [[connections]]
//! id = "clinic"
//! backend = "postgresql"
//! host = "db.internal"
//! database = "ehr"
//! username = "deid_reader"
//! credentials = { source = "env", var = "CLINIC_DB_PASSWORD" }
//!
//! [[rules]]
//! id = "mask-name"
//! kind = { type = "mask", keep_suffix = 2 }
//! selector = { columns = ["name"] }
//!
//! [[mappings]]
//! id = "mrn"
//! domain = "mrn"
//! ```
//!
//! Catalog sections (`connections`, `rules`, `mappings`) are seeded into the
//! control store at startup.

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, DeidConfig, LoggingConfig, PipelineConfig, PoolConfig, RetryConfig,
    ServerConfig, SinkConfig, SinkMode, StateConfig,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
