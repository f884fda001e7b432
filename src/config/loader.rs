//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{DeidConfig, SinkMode};
use crate::config::secret_string;
use crate::domain::errors::DeidError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`DeidConfig`]
/// 4. Applies environment variable overrides (`DEID_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns `Configuration` if the file cannot be read or parsed, a referenced
/// environment variable is unset, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use deid::config::loader::load_config;
///
/// let config = load_config("deid.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<DeidConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(DeidError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        DeidError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text (substitution, overrides, validation)
///
/// # Errors
///
/// See [`load_config`].
pub fn parse_config(contents: &str) -> Result<DeidConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: DeidConfig = toml::from_str(&contents)
        .map_err(|e| DeidError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        DeidError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| DeidError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |cap: &regex::Captures<'_>| {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(DeidError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        DeidError::Configuration(format!("Invalid value '{value}' for {name}"))
    })
}

/// Applies environment variable overrides using the `DEID_*` prefix
fn apply_env_overrides(config: &mut DeidConfig) -> Result<()> {
    if let Ok(val) = std::env::var("DEID_LOG_LEVEL") {
        config.application.log_level = val;
    }

    if let Ok(val) = std::env::var("DEID_STATE_URL") {
        config.state.database_url = secret_string(val);
    }

    if let Ok(val) = std::env::var("DEID_POOL_MAX_CONNECTIONS") {
        config.pool.max_connections = parse_env("DEID_POOL_MAX_CONNECTIONS", &val)?;
    }
    if let Ok(val) = std::env::var("DEID_POOL_ACQUIRE_TIMEOUT_SECONDS") {
        config.pool.acquire_timeout_seconds =
            parse_env("DEID_POOL_ACQUIRE_TIMEOUT_SECONDS", &val)?;
    }

    if let Ok(val) = std::env::var("DEID_BATCH_SIZE") {
        config.pipeline.batch_size = parse_env("DEID_BATCH_SIZE", &val)?;
    }
    if let Ok(val) = std::env::var("DEID_SINK_MODE") {
        config.pipeline.sink.mode = match val.as_str() {
            "new_table" => SinkMode::NewTable,
            "in_place" => SinkMode::InPlace,
            "jsonl" => SinkMode::Jsonl,
            other => {
                return Err(DeidError::Configuration(format!(
                    "Invalid DEID_SINK_MODE '{other}'. Must be one of: new_table, in_place, jsonl"
                )))
            }
        };
    }
    if let Ok(val) = std::env::var("DEID_OUTPUT_DIR") {
        config.pipeline.sink.output_dir = val.into();
    }

    if let Ok(val) = std::env::var("DEID_SERVER_BIND") {
        config.server.bind = val;
    }

    config
        .deidentification
        .apply_env_overrides()
        .map_err(|e| DeidError::Configuration(format!("{e:#}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("DEID_TEST_SUBST_VAR", "test_value");
        let input = "password = \"${DEID_TEST_SUBST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
        std::env::remove_var("DEID_TEST_SUBST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("DEID_TEST_MISSING_VAR");
        let input = "password = \"${DEID_TEST_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("DEID_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        std::env::remove_var("DEID_TEST_COMMENTED_VAR");
        let input = "# password = \"${DEID_TEST_COMMENTED_VAR}\"";
        assert!(substitute_env_vars(input).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(DeidError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[application]
log_level = "debug"

[state]
database_url = "sqlite://state.db"

[pipeline]
batch_size = 250

[pipeline.sink]
mode = "jsonl"
output_dir = "./out"

[[connections]]
id = "clinic"
backend = "sqlite"
database = "./clinic.db"

[[rules]]
id = "mask-name"
kind = { type = "mask", keep_suffix = 2 }
selector = { columns = ["name"] }

[[mappings]]
id = "mrn"
domain = "mrn"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.pipeline.batch_size, 250);
        assert_eq!(config.pipeline.sink.mode, SinkMode::Jsonl);
        assert_eq!(config.connections.len(), 1);
        assert_eq!(config.rules[0].id.as_str(), "mask-name");
        assert_eq!(config.mappings[0].domain, "mrn");
    }

    #[test]
    fn test_validation_failure_is_configuration_error() {
        let err = parse_config("[pipeline]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));
        assert!(err.to_string().contains("batch_size"));
    }
}
