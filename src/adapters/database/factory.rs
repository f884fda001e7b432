//! Backend and control store factory
//!
//! Source backends are chosen by the descriptor's [`BackendKind`]; the control
//! store by the scheme of `state.database_url`.

use crate::adapters::database::traits::{ControlStore, SourceBackend};
use crate::adapters::postgresql::{PgPoolSettings, PostgreSQLClient, PostgreSQLSource, PostgreSQLStore};
use crate::adapters::sqlite::{SqlitePoolSettings, SqliteSource, SqliteStore};
use crate::config::{PoolConfig, StateConfig};
use crate::domain::{BackendKind, ConnectionDescriptor, DeidError, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

/// Create a source backend for a connection descriptor
///
/// PostgreSQL pools are lazy; SQLite opens the file immediately so a missing
/// database is reported here.
///
/// # Errors
///
/// `Configuration` if credentials cannot be resolved, `Connection` if a SQLite
/// file cannot be opened.
pub async fn create_source_backend(
    descriptor: &ConnectionDescriptor,
    pool: &PoolConfig,
) -> Result<Arc<dyn SourceBackend>> {
    match descriptor.backend {
        BackendKind::Postgresql => {
            let mut pg_config = tokio_postgres::Config::new();
            pg_config
                .host(descriptor.host.as_deref().unwrap_or("localhost"))
                .port(descriptor.effective_port().unwrap_or(5432))
                .dbname(&descriptor.database)
                .user(descriptor.username.as_deref().unwrap_or_default())
                .connect_timeout(Duration::from_secs(pool.acquire_timeout_seconds))
                .application_name("deid");
            if let Some(credentials) = &descriptor.credentials {
                let password = credentials.resolve()?;
                pg_config.password(password.expose_secret().as_bytes());
            }
            if descriptor.ssl_mode == crate::domain::SslMode::Require {
                pg_config.ssl_mode(tokio_postgres::config::SslMode::Require);
            }

            tracing::info!(
                connection_id = %descriptor.id,
                target = %descriptor.safe_target(),
                "Creating PostgreSQL source"
            );
            let client = PostgreSQLClient::new(
                pg_config,
                PgPoolSettings {
                    max_connections: pool.max_connections,
                    acquire_timeout: Duration::from_secs(pool.acquire_timeout_seconds),
                    statement_timeout: Duration::from_secs(pool.statement_timeout_seconds),
                },
                descriptor.safe_target(),
            )?;

            Ok(Arc::new(PostgreSQLSource::new(client)) as Arc<dyn SourceBackend>)
        }
        BackendKind::Sqlite => {
            tracing::info!(
                connection_id = %descriptor.id,
                target = %descriptor.safe_target(),
                "Creating SQLite source"
            );
            let source = SqliteSource::open(&descriptor.database, sqlite_settings(pool)).await?;
            Ok(Arc::new(source) as Arc<dyn SourceBackend>)
        }
    }
}

/// Create the control store from `state.database_url`
///
/// # Errors
///
/// `Configuration` for an unsupported scheme, otherwise whatever opening the
/// store and applying its schema returns.
pub async fn create_control_store(
    state: &StateConfig,
    pool: &PoolConfig,
) -> Result<Arc<dyn ControlStore>> {
    let url: &str = state.database_url.expose_secret().as_ref();

    if url.starts_with("sqlite:") {
        tracing::info!("Creating SQLite control store");
        let settings = SqlitePoolSettings {
            max_connections: state.max_connections,
            ..sqlite_settings(pool)
        };
        let store = SqliteStore::connect(url, settings).await?;
        return Ok(Arc::new(store) as Arc<dyn ControlStore>);
    }

    if url.starts_with("postgresql://") || url.starts_with("postgres://") {
        tracing::info!("Creating PostgreSQL control store");
        let client = PostgreSQLClient::from_url(
            url,
            PgPoolSettings {
                max_connections: state.max_connections,
                acquire_timeout: Duration::from_secs(pool.acquire_timeout_seconds),
                statement_timeout: Duration::from_secs(pool.statement_timeout_seconds),
            },
        )?;
        let store = PostgreSQLStore::connect(client).await?;
        return Ok(Arc::new(store) as Arc<dyn ControlStore>);
    }

    Err(DeidError::Configuration(
        "state.database_url must use the sqlite: or postgresql:// scheme".to_string(),
    ))
}

fn sqlite_settings(pool: &PoolConfig) -> SqlitePoolSettings {
    SqlitePoolSettings {
        max_connections: pool.max_connections,
        acquire_timeout: Duration::from_secs(pool.acquire_timeout_seconds),
        idle_timeout: Duration::from_secs(pool.idle_timeout_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;
    use crate::domain::{ConnectionId, SslMode};

    #[tokio::test]
    async fn test_unsupported_state_scheme() {
        let state = StateConfig {
            database_url: secret_string("mysql://localhost/deid".to_string()),
            max_connections: 1,
        };
        let err = create_control_store(&state, &PoolConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeidError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_sqlite_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = ConnectionDescriptor {
            id: ConnectionId::new("missing").unwrap(),
            name: String::new(),
            backend: BackendKind::Sqlite,
            host: None,
            port: None,
            database: dir.path().join("nope.db").display().to_string(),
            username: None,
            credentials: None,
            ssl_mode: SslMode::Disable,
        };

        let err = create_source_backend(&descriptor, &PoolConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeidError::Connection(_)));
    }
}
