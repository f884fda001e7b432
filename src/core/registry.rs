//! Connection registry
//!
//! Owns the connection descriptor lifecycle and hands out pooled source
//! backends. Backends are created on first use and cached per connection id;
//! every later `resolve` shares the same pool.

use crate::adapters::database::{create_source_backend, ControlStore, SourceBackend};
use crate::config::PoolConfig;
use crate::domain::{ConnectionDescriptor, ConnectionId, ConnectionSummary, DeidError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connection catalog plus the cache of live backends
pub struct ConnectionRegistry {
    store: Arc<dyn ControlStore>,
    pool: PoolConfig,
    backends: RwLock<HashMap<ConnectionId, Arc<dyn SourceBackend>>>,
}

impl ConnectionRegistry {
    /// Create a registry over the control store catalog
    pub fn new(store: Arc<dyn ControlStore>, pool: PoolConfig) -> Self {
        Self {
            store,
            pool,
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a new connection
    ///
    /// # Errors
    ///
    /// `Validation` for a bad descriptor or an id that is already registered.
    pub async fn register(&self, descriptor: ConnectionDescriptor) -> Result<ConnectionId> {
        descriptor.validate()?;
        if self.store.load_connection(&descriptor.id).await?.is_some() {
            return Err(DeidError::Validation(format!(
                "Connection '{}' already exists",
                descriptor.id
            )));
        }

        self.store.save_connection(&descriptor).await?;
        tracing::info!(
            connection_id = %descriptor.id,
            target = %descriptor.safe_target(),
            "Connection registered"
        );
        Ok(descriptor.id)
    }

    /// Replaces a connection's settings
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Validation` when a completed run used it.
    pub async fn update(&self, descriptor: ConnectionDescriptor) -> Result<()> {
        descriptor.validate()?;
        self.get(&descriptor.id).await?;
        self.ensure_mutable(&descriptor.id).await?;

        self.store.save_connection(&descriptor).await?;
        self.evict(&descriptor.id).await;
        tracing::info!(connection_id = %descriptor.id, "Connection updated");
        Ok(())
    }

    /// Removes a connection
    pub async fn remove(&self, id: &ConnectionId) -> Result<()> {
        self.get(id).await?;
        self.ensure_mutable(id).await?;

        self.store.delete_connection(id).await?;
        self.evict(id).await;
        tracing::info!(connection_id = %id, "Connection removed");
        Ok(())
    }

    /// Loads configured connections into the catalog
    ///
    /// A descriptor whose target is unchanged is left alone; a changed target
    /// for a connection a completed run used is an error.
    pub async fn seed(&self, descriptors: &[ConnectionDescriptor]) -> Result<()> {
        for descriptor in descriptors {
            descriptor.validate()?;
            if let Some(existing) = self.store.load_connection(&descriptor.id).await? {
                if existing.same_target(descriptor) && existing.name == descriptor.name {
                    continue;
                }
                if !existing.same_target(descriptor) {
                    self.ensure_mutable(&descriptor.id).await?;
                }
            }
            self.store.save_connection(descriptor).await?;
            self.evict(&descriptor.id).await;
        }
        tracing::debug!(count = descriptors.len(), "Seeded connections");
        Ok(())
    }

    /// Full descriptor, including the credential reference
    pub async fn get(&self, id: &ConnectionId) -> Result<ConnectionDescriptor> {
        self.store
            .load_connection(id)
            .await?
            .ok_or_else(|| DeidError::NotFound(format!("Connection '{id}' not found")))
    }

    /// Every connection, without credentials
    pub async fn list(&self) -> Result<Vec<ConnectionSummary>> {
        let connections = self.store.list_connections().await?;
        Ok(connections.iter().map(ConnectionDescriptor::summary).collect())
    }

    /// Live backend for a connection, creating its pool on first use
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `Connection` or `Configuration` if the
    /// backend cannot be created.
    pub async fn resolve(&self, id: &ConnectionId) -> Result<Arc<dyn SourceBackend>> {
        if let Some(backend) = self.backends.read().await.get(id) {
            return Ok(backend.clone());
        }

        let descriptor = self.get(id).await?;
        let mut backends = self.backends.write().await;
        if let Some(backend) = backends.get(id) {
            return Ok(backend.clone());
        }

        let backend = create_source_backend(&descriptor, &self.pool).await?;
        backends.insert(id.clone(), backend.clone());
        tracing::debug!(connection_id = %id, "Cached source backend");
        Ok(backend)
    }

    /// Installs a caller-built backend for a registered connection
    ///
    /// Later `resolve` calls return it instead of opening a pool. Used to
    /// embed the engine over a custom [`SourceBackend`].
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn attach(&self, id: &ConnectionId, backend: Arc<dyn SourceBackend>) -> Result<()> {
        self.get(id).await?;
        self.backends.write().await.insert(id.clone(), backend);
        tracing::debug!(connection_id = %id, "Attached source backend");
        Ok(())
    }

    /// Opens a handle and runs a trivial query
    pub async fn test(&self, id: &ConnectionId) -> Result<()> {
        let backend = self.resolve(id).await?;
        backend.test_connection().await?;
        tracing::info!(connection_id = %id, "Connection test succeeded");
        Ok(())
    }

    async fn ensure_mutable(&self, id: &ConnectionId) -> Result<()> {
        if self.store.connection_used_by_completed_run(id).await? {
            return Err(DeidError::Validation(format!(
                "Connection '{id}' is referenced by a completed run and cannot be changed"
            )));
        }
        Ok(())
    }

    async fn evict(&self, id: &ConnectionId) {
        self.backends.write().await.remove(id);
    }
}
