//! Service wiring shared by the CLI and the HTTP server

use crate::adapters::database::{create_control_store, ControlStore};
use crate::config::DeidConfig;
use crate::core::mapping::MappingStore;
use crate::core::pipeline::RunCoordinator;
use crate::core::registry::ConnectionRegistry;
use crate::core::retry::RetryPolicy;
use crate::core::schema::SchemaInspector;
use crate::core::tracker::RunTracker;
use crate::deidentification::{AuditLogger, RuleEngine};
use crate::domain::{DeidError, Result};
use std::sync::Arc;

/// Every long-lived component, built once per process
pub struct DeidService {
    store: Arc<dyn ControlStore>,
    registry: Arc<ConnectionRegistry>,
    inspector: Arc<SchemaInspector>,
    engine: Arc<RuleEngine>,
    mappings: Arc<MappingStore>,
    tracker: Arc<RunTracker>,
    coordinator: Arc<RunCoordinator>,
}

impl DeidService {
    /// Opens the control store named by the configuration and starts the service
    pub async fn start(config: &DeidConfig) -> Result<Self> {
        let store = create_control_store(&config.state, &config.pool).await?;
        Self::with_store(config, store).await
    }

    /// Starts the service on an already opened control store
    ///
    /// Seeds the catalog sections of the configuration and marks runs left
    /// behind by a previous process as interrupted.
    pub async fn with_store(config: &DeidConfig, store: Arc<dyn ControlStore>) -> Result<Self> {
        let retry = RetryPolicy::from(&config.pipeline.retry);
        let mappings = Arc::new(
            MappingStore::open(
                store.clone(),
                config.deidentification.mapping_key.as_ref(),
                retry,
            )
            .await?,
        );
        let engine = Arc::new(RuleEngine::new(store.clone(), mappings.clone()));
        let registry = Arc::new(ConnectionRegistry::new(store.clone(), config.pool.clone()));

        registry.seed(&config.connections).await?;
        engine.seed(&config.rules).await?;
        mappings.seed_field_mappings(&config.mappings).await?;

        let audit = AuditLogger::new(&config.deidentification.audit)
            .map_err(|e| DeidError::Configuration(format!("{e:#}")))?;

        let detector = config
            .deidentification
            .scan
            .detector()
            .map_err(|e| DeidError::Configuration(format!("{e:#}")))?;
        let inspector = Arc::new(SchemaInspector::new(
            registry.clone(),
            Arc::new(detector),
            config.deidentification.scan.sample_size,
        ));
        let tracker = Arc::new(RunTracker::new(store.clone()));
        let coordinator = Arc::new(RunCoordinator::new(
            store.clone(),
            registry.clone(),
            inspector.clone(),
            engine.clone(),
            tracker.clone(),
            Arc::new(audit),
            config.pipeline.clone(),
            config.deidentification.clone(),
        ));

        let recovered = coordinator.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!(runs = recovered, "Found interrupted runs; resume them to continue");
        }

        Ok(Self {
            store,
            registry,
            inspector,
            engine,
            mappings,
            tracker,
            coordinator,
        })
    }

    /// Control store
    pub fn store(&self) -> &Arc<dyn ControlStore> {
        &self.store
    }

    /// Connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Schema inspector
    pub fn inspector(&self) -> &Arc<SchemaInspector> {
        &self.inspector
    }

    /// Rule engine
    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Mapping store
    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    /// Run tracker
    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    /// Run coordinator
    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }
}
