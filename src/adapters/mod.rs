//! External system integrations.
//!
//! - [`database`] - capability traits and the backend factory
//! - [`postgresql`] - PostgreSQL source backend and control store (deadpool)
//! - [`sqlite`] - SQLite source backend and control store (sqlx)
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern**: the pipeline and the HTTP layer
//! only see [`database::SourceBackend`] and [`database::ControlStore`], so a new
//! backend kind is one more implementation and one more factory arm.
//!
//! ```rust,no_run
//! use deid::adapters::database::{create_control_store, CatalogStorage};
//! use deid::config::{PoolConfig, StateConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = create_control_store(&StateConfig::default(), &PoolConfig::default()).await?;
//! let rules = store.list_rules().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod postgresql;
pub mod sqlite;
