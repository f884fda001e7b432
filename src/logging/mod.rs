//! Logging and observability
//!
//! Structured logging through `tracing`, with an optional rotating JSON file.
//!
//! # Example
//!
//! ```no_run
//! use deid::logging::init_logging;
//! use deid::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(run_id = "4f1c", "Run dispatched");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a committed batch
///
/// # Example
///
/// ```no_run
/// use deid::log_batch_committed;
///
/// log_batch_committed!("4f1c", 3, 1000, 812);
/// ```
#[macro_export]
macro_rules! log_batch_committed {
    ($run_id:expr, $batch:expr, $scanned:expr, $modified:expr) => {
        tracing::info!(
            run_id = %$run_id,
            batch = $batch,
            rows_scanned = $scanned,
            rows_modified = $modified,
            "Batch committed"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use deid::log_retry_attempt;
///
/// log_retry_attempt!("write_batch", 2, 3, "database is locked");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($operation:expr, $attempt:expr, $max_attempts:expr, $error:expr) => {
        tracing::warn!(
            operation = %$operation,
            attempt = $attempt,
            max_attempts = $max_attempts,
            error = %$error,
            "Retrying operation"
        );
    };
}
