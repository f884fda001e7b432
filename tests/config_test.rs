//! Configuration loading and catalog seeding
//!
//! Tests in this file touch process environment variables; each variable is
//! set by one test only and none changes what another test asserts.

mod common;

use common::{request, seed_patients, Fixture, CONNECTION};
use deid::config::{load_config, SinkMode};
use deid::core::service::DeidService;
use deid::domain::{ConnectionId, DeidError, RunStatus};
use std::fs;

#[tokio::test]
async fn test_load_config_with_substitution_and_overrides() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("deid.toml");
    let toml = fixture
        .config_toml(100, None)
        .replace(
            &format!("database = \"{}\"", fixture.source_path.display()),
            "database = \"${DEID_IT_SOURCE_DB}\"",
        );
    fs::write(&path, toml).unwrap();

    std::env::set_var("DEID_IT_SOURCE_DB", fixture.source_path.display().to_string());
    std::env::set_var("DEID_SERVER_BIND", "127.0.0.1:9911");
    let loaded = load_config(&path);
    std::env::remove_var("DEID_SERVER_BIND");
    std::env::remove_var("DEID_IT_SOURCE_DB");

    let config = loaded.unwrap();
    assert_eq!(config.pipeline.batch_size, 100);
    assert_eq!(config.server.bind, "127.0.0.1:9911");
    assert_eq!(config.pipeline.sink.mode, SinkMode::NewTable);
    assert_eq!(
        config.connections[0].database,
        fixture.source_path.display().to_string()
    );
    assert_eq!(config.rules.len(), 4);
}

#[tokio::test]
async fn test_unset_variable_is_configuration_error() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("deid.toml");
    fs::write(
        &path,
        "[state]\ndatabase_url = \"${DEID_IT_NEVER_SET_URL}\"\n",
    )
    .unwrap();

    std::env::remove_var("DEID_IT_NEVER_SET_URL");
    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, DeidError::Configuration(_)));
    assert!(err.to_string().contains("DEID_IT_NEVER_SET_URL"));
}

#[tokio::test]
async fn test_catalog_seeded_and_key_persisted() {
    let fixture = Fixture::new();

    let first = fixture.service(10, None).await;
    let connections = first.registry().list().await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].id.as_str(), CONNECTION);
    assert_eq!(first.engine().list_rules().await.unwrap().len(), 4);
    let fingerprint = first.mappings().key().sign_hex(&[b"fingerprint".as_slice()]);
    drop(first);

    // Seeding again is a no-op and the generated key is reused
    let second = fixture.service(10, None).await;
    assert_eq!(second.registry().list().await.unwrap().len(), 1);
    assert_eq!(second.mappings().key().sign_hex(&[b"fingerprint".as_slice()]), fingerprint);
}

#[tokio::test]
async fn test_connection_locked_after_completed_run() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 3).await;

    let service = fixture.service(10, None).await;
    let id = service
        .coordinator()
        .dispatch(request("patients", &["mask-name"]))
        .await
        .unwrap();
    assert_eq!(
        service.coordinator().wait(&id).await.unwrap().status,
        RunStatus::Completed
    );
    drop(service);

    let mut config = fixture.config(10, None);
    config.connections[0].database = fixture.dir.path().join("other.db").display().to_string();
    let err = DeidService::start(&config).await.err().unwrap();
    assert!(matches!(err, DeidError::Validation(_)));

    // The stored descriptor still points at the original source
    let config = fixture.config(10, None);
    let service = DeidService::start(&config).await.unwrap();
    let stored = service
        .registry()
        .get(&ConnectionId::new(CONNECTION).unwrap())
        .await
        .unwrap();
    assert_eq!(stored.database, fixture.source_path.display().to_string());
}
