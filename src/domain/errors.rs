//! Domain error types
//!
//! This module defines the error taxonomy for the de-identification engine.
//! Backend driver errors are converted at the adapter boundary so callers only
//! ever see [`DeidError`].

use thiserror::Error;

/// Main error type
///
/// Variants are grouped by how they propagate:
/// - configuration-time errors (`Configuration`, `Validation`, `InvalidRuleParameter`,
///   `NotFound`) are rejected before a run starts
/// - row-level errors (`TypeMismatch`) are recorded in the run error log
/// - systemic errors (`Connection`, `Storage`, `Timeout`) fail the run
#[derive(Debug, Error)]
pub enum DeidError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend unreachable or credentials rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Missing table, column, connection, rule, mapping or run
    #[error("Not found: {0}")]
    NotFound(String),

    /// Value does not fit the rule's expected type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Bad rule configuration
    #[error("Invalid rule parameter: {0}")]
    InvalidRuleParameter(String),

    /// Control store or output sink unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Pool acquisition or backend timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Run stopped on operator request
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl DeidError {
    /// Short machine-readable kind, used in run error logs
    pub fn kind(&self) -> &'static str {
        match self {
            DeidError::Configuration(_) => "configuration",
            DeidError::Connection(_) => "connection",
            DeidError::NotFound(_) => "not_found",
            DeidError::TypeMismatch(_) => "type_mismatch",
            DeidError::InvalidRuleParameter(_) => "invalid_rule_parameter",
            DeidError::Storage(_) => "storage",
            DeidError::Timeout(_) => "timeout",
            DeidError::Validation(_) => "validation",
            DeidError::Serialization(_) => "serialization",
            DeidError::Io(_) => "io",
            DeidError::Cancelled(_) => "cancelled",
        }
    }

    /// Whether the failed operation may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeidError::Connection(_) | DeidError::Storage(_) | DeidError::Timeout(_)
        )
    }

    /// Whether the error only affects a single field value
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            DeidError::TypeMismatch(_) | DeidError::InvalidRuleParameter(_)
        )
    }

    /// Stable operator-facing message
    ///
    /// Messages we compose ourselves (not found, validation, rule parameters) are
    /// returned verbatim. Errors that may carry backend detail are replaced by a
    /// fixed sentence.
    pub fn public_message(&self) -> String {
        match self {
            DeidError::NotFound(msg)
            | DeidError::Validation(msg)
            | DeidError::InvalidRuleParameter(msg)
            | DeidError::TypeMismatch(msg)
            | DeidError::Configuration(msg) => msg.clone(),
            DeidError::Connection(_) => "Unable to connect to the database".to_string(),
            DeidError::Storage(_) => "Storage is currently unavailable".to_string(),
            DeidError::Timeout(_) => "Timed out waiting for the database".to_string(),
            DeidError::Serialization(_) | DeidError::Io(_) => {
                "Internal error while processing the request".to_string()
            }
            DeidError::Cancelled(_) => "cancelled".to_string(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for DeidError {
    fn from(err: std::io::Error) -> Self {
        DeidError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for DeidError {
    fn from(err: serde_json::Error) -> Self {
        DeidError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for DeidError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            DeidError::Io(err.to_string())
        } else {
            DeidError::Serialization(err.to_string())
        }
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for DeidError {
    fn from(err: toml::de::Error) -> Self {
        DeidError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<sqlx::Error> for DeidError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                DeidError::Timeout("Timed out acquiring a SQLite connection".to_string())
            }
            sqlx::Error::RowNotFound => DeidError::NotFound("Row not found".to_string()),
            sqlx::Error::Io(e) => DeidError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => DeidError::Connection(e.to_string()),
            sqlx::Error::PoolClosed => DeidError::Connection("Pool closed".to_string()),
            sqlx::Error::Configuration(e) => DeidError::Configuration(e.to_string()),
            other => DeidError::Storage(other.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for DeidError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            DeidError::Connection(err.to_string())
        } else if err.as_db_error().is_some() {
            DeidError::Storage(err.to_string())
        } else {
            DeidError::Connection(err.to_string())
        }
    }
}

impl From<deadpool_postgres::PoolError> for DeidError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(kind) => DeidError::Timeout(format!(
                "Timed out acquiring a PostgreSQL connection ({kind:?})"
            )),
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => DeidError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deid_error_display() {
        let err = DeidError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_not_found_message_is_public() {
        let err = DeidError::NotFound("Table 'visits' not found".to_string());
        assert_eq!(err.public_message(), "Table 'visits' not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_backend_detail_is_not_public() {
        let err = DeidError::Connection("password authentication failed for user \"bob\"".into());
        assert!(!err.public_message().contains("bob"));
        let err = DeidError::Storage("disk I/O error at 0x7f".into());
        assert!(!err.public_message().contains("0x7f"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DeidError::Storage("x".into()).is_transient());
        assert!(DeidError::Timeout("x".into()).is_transient());
        assert!(DeidError::Connection("x".into()).is_transient());
        assert!(!DeidError::TypeMismatch("x".into()).is_transient());
        assert!(!DeidError::Validation("x".into()).is_transient());
    }

    #[test]
    fn test_row_level_classification() {
        assert!(DeidError::TypeMismatch("x".into()).is_row_level());
        assert!(DeidError::InvalidRuleParameter("x".into()).is_row_level());
        assert!(!DeidError::Storage("x".into()).is_row_level());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: DeidError = io_err.into();
        assert!(matches!(err, DeidError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: DeidError = json_err.into();
        assert!(matches!(err, DeidError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: DeidError = toml_err.into();
        assert!(matches!(err, DeidError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_sqlx_pool_timeout_maps_to_timeout() {
        let err: DeidError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DeidError::Timeout(_)));
    }

    #[test]
    fn test_deid_error_implements_std_error() {
        let err = DeidError::Validation("Test error".to_string());
        let _: &dyn std::error::Error = &err;
    }
}
