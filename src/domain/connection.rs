//! Connection descriptors for relational data sources
//!
//! A descriptor carries everything needed to open a pool against one source
//! database. Passwords are referenced, never stored in clear in `Debug` output:
//! either the name of an environment variable or an inline [`SecretString`].

use crate::config::{secret_string, SecretString};
use crate::domain::ids::ConnectionId;
use crate::domain::{DeidError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend kinds a descriptor may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL via deadpool/tokio-postgres
    #[serde(alias = "postgres")]
    Postgresql,
    /// SQLite file database via sqlx
    Sqlite,
}

impl BackendKind {
    /// Lowercase name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgresql => "postgresql",
            BackendKind::Sqlite => "sqlite",
        }
    }

    fn default_port(&self) -> Option<u16> {
        match self {
            BackendKind::Postgresql => Some(5432),
            BackendKind::Sqlite => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DeidError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(BackendKind::Postgresql),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(DeidError::Validation(format!(
                "Unsupported backend kind '{other}'. Supported: postgresql, sqlite"
            ))),
        }
    }
}

/// TLS mode for network backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Plain TCP
    #[default]
    Disable,
    /// TLS required, certificate chain verified by the system store
    Require,
}

/// Where a connection's password comes from
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialRef {
    /// Read from an environment variable at resolve time
    Env {
        /// Variable name
        var: String,
    },
    /// Stored with the descriptor
    Inline {
        /// The password
        secret: SecretString,
    },
}

impl CredentialRef {
    /// Resolves the password
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the referenced environment variable is unset.
    pub fn resolve(&self) -> Result<SecretString> {
        match self {
            CredentialRef::Env { var } => std::env::var(var).map(secret_string).map_err(|_| {
                DeidError::Configuration(format!(
                    "Credential environment variable '{var}' is not set"
                ))
            }),
            CredentialRef::Inline { secret } => Ok(secret.clone()),
        }
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env { var } => f.debug_struct("Env").field("var", var).finish(),
            CredentialRef::Inline { .. } => f.write_str("Inline([REDACTED])"),
        }
    }
}

/// Full connection descriptor, including the credential reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Stable identifier
    pub id: ConnectionId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Backend kind
    pub backend: BackendKind,

    /// Host name (network backends)
    #[serde(default)]
    pub host: Option<String>,

    /// Port (network backends)
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name, or file path for SQLite
    pub database: String,

    /// User name (network backends)
    #[serde(default)]
    pub username: Option<String>,

    /// Password reference
    #[serde(default)]
    pub credentials: Option<CredentialRef>,

    /// TLS mode (network backends)
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl ConnectionDescriptor {
    /// Validates the descriptor shape
    ///
    /// # Errors
    ///
    /// Returns `Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(DeidError::Validation(format!(
                "Connection '{}': database cannot be empty",
                self.id
            )));
        }

        if self.backend == BackendKind::Postgresql {
            if self.host.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(DeidError::Validation(format!(
                    "Connection '{}': host is required for postgresql",
                    self.id
                )));
            }
            if self.username.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(DeidError::Validation(format!(
                    "Connection '{}': username is required for postgresql",
                    self.id
                )));
            }
        }

        if let Some(CredentialRef::Env { var }) = &self.credentials {
            if var.trim().is_empty() {
                return Err(DeidError::Validation(format!(
                    "Connection '{}': credential environment variable name cannot be empty",
                    self.id
                )));
            }
        }

        Ok(())
    }

    /// Effective port, falling back to the backend default
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.backend.default_port())
    }

    /// Connection target without credentials, safe for logs
    pub fn safe_target(&self) -> String {
        match self.backend {
            BackendKind::Sqlite => format!("sqlite://{}", self.database),
            BackendKind::Postgresql => format!(
                "postgresql://{}@{}:{}/{}",
                self.username.as_deref().unwrap_or(""),
                self.host.as_deref().unwrap_or(""),
                self.effective_port().unwrap_or(5432),
                self.database
            ),
        }
    }

    /// Summary without credentials
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            backend: self.backend,
            host: self.host.clone(),
            port: self.effective_port(),
            database: self.database.clone(),
        }
    }

    /// Whether two descriptors point at the same data with the same settings.
    ///
    /// Inline secrets are compared by value so a changed password counts as a change.
    pub fn same_target(&self, other: &ConnectionDescriptor) -> bool {
        use secrecy::ExposeSecret;

        let creds_equal = match (&self.credentials, &other.credentials) {
            (None, None) => true,
            (Some(CredentialRef::Env { var: a }), Some(CredentialRef::Env { var: b })) => a == b,
            (
                Some(CredentialRef::Inline { secret: a }),
                Some(CredentialRef::Inline { secret: b }),
            ) => a.expose_secret().as_ref() == b.expose_secret().as_ref(),
            _ => false,
        };

        self.backend == other.backend
            && self.host == other.host
            && self.effective_port() == other.effective_port()
            && self.database == other.database
            && self.username == other.username
            && self.ssl_mode == other.ssl_mode
            && creds_equal
    }
}

/// Connection listing entry, never carries credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    /// Stable identifier
    pub id: ConnectionId,
    /// Display name
    pub name: String,
    /// Backend kind
    pub backend: BackendKind,
    /// Host name
    pub host: Option<String>,
    /// Port
    pub port: Option<u16>,
    /// Database name or file path
    pub database: String,
}
