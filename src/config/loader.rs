//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::JobQueueConfig;
use crate::domain::errors::JobQueueError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Prefix of environment variables that override file values
pub const ENV_PREFIX: &str = "FHIR_JOBQUEUE";

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Layers `FHIR_JOBQUEUE_<SECTION>__<KEY>` environment overrides on top
/// 4. Validates the configuration
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - TOML parsing fails
/// - A referenced environment variable is not set
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use fhir_jobqueue::config::loader::load_config;
///
/// let config = load_config("fhir-jobqueue.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<JobQueueConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(JobQueueError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        JobQueueError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    load_config_from_str(&contents)
}

/// Parses, overrides and validates configuration held in memory
pub fn load_config_from_str(contents: &str) -> Result<JobQueueConfig> {
    let contents = substitute_env_vars(contents)?;

    // Fail early with the TOML parser's line/column diagnostics
    toml::from_str::<toml::Value>(&contents)?;

    let config: JobQueueConfig = config::Config::builder()
        .add_source(config::File::from_str(&contents, config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate().map_err(|e| {
        JobQueueError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap_or_else(|e| panic!("invalid pattern: {e}"))
    })
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = placeholder_pattern();
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    let placeholder = format!("${{{}}}", var_name);
                    processed_line = processed_line.replace(&placeholder, &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(JobQueueError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseTarget;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("FJQ_LOADER_TEST_VAR", "test_value");
        let input = "password = \"${FJQ_LOADER_TEST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
        std::env::remove_var("FJQ_LOADER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("FJQ_LOADER_MISSING_VAR");
        let input = "password = \"${FJQ_LOADER_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("FJQ_LOADER_MISSING_VAR"));
    }

    #[test]
    fn test_comments_are_not_substituted() {
        std::env::remove_var("FJQ_LOADER_COMMENTED_VAR");
        let input = "# key = \"${FJQ_LOADER_COMMENTED_VAR}\"\nlog_level = \"info\"";
        assert!(substitute_env_vars(input).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
database_target = "memory"

[application]
log_level = "debug"
worker_name = "unit-test"

[queue]
queue_types = ["export", "reindex"]
lease_seconds = 120
heartbeat_interval_seconds = 30

[queue.admission]
max_running_roots = { export = 2 }

[logging]
local_enabled = false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.database_target, DatabaseTarget::Memory);
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.queue.lease_seconds, 120);
        assert_eq!(config.queue.max_failure_count, 3);
        assert_eq!(config.queue.admission.max_running_roots.get("export"), Some(&2));
        assert_eq!(config.worker_name(), "unit-test");
    }

    #[test]
    fn test_invalid_toml_reports_parse_error() {
        let err = load_config_from_str("database_target = = \"memory\"").unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_validation_failure_is_reported() {
        let toml_content = r#"
database_target = "memory"

[queue]
lease_seconds = 10
heartbeat_interval_seconds = 10
"#;
        let err = load_config_from_str(toml_content).unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_seconds"));
    }
}
