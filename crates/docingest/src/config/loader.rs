use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("config-v1.json");

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "DOCINGEST_";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the file if given (defaults otherwise), then applies `DOCINGEST_*`
/// environment overrides and validates the result.
pub fn load_with_env(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a full variable name to its value.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name).map(|value| (name, value))
    };

    if let Some((name, value)) = var("JOB_TTL_SECONDS") {
        config.jobs.ttl_seconds = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("MAX_RETRIES") {
        config.jobs.max_retries = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("RETRY_BACKOFF_SECONDS") {
        config.jobs.retry_backoff_seconds = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("SOFT_TIME_LIMIT_SECONDS") {
        config.jobs.soft_time_limit_seconds = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("HARD_TIME_LIMIT_SECONDS") {
        config.jobs.hard_time_limit_seconds = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("WORKERS") {
        config.jobs.workers = parse_env(&name, &value)?;
    }
    if let Some((_, value)) = var("UPLOAD_DIR") {
        config.uploads.directory = PathBuf::from(value);
    }
    if let Some((name, value)) = var("MAX_FILE_SIZE_BYTES") {
        config.uploads.max_file_size_bytes = parse_env(&name, &value)?;
    }
    if let Some((_, value)) = var("ALLOWED_EXTENSIONS") {
        config.uploads.allowed_extensions = value
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
    }
    if let Some((name, value)) = var("CHUNK_SIZE") {
        config.chunking.chunk_size = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("CHUNK_OVERLAP") {
        config.chunking.chunk_overlap = parse_env(&name, &value)?;
    }
    if let Some((_, value)) = var("DATABASE_PATH") {
        config.database.path = Some(PathBuf::from(value));
    }
    if let Some((_, value)) = var("VECTOR_DIR") {
        config.vector_store.directory = PathBuf::from(value);
    }

    Ok(())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Validate version
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let jobs = &config.jobs;
    if jobs.ttl_seconds == 0 {
        return Err(invalid("jobs.ttl_seconds must be greater than zero"));
    }
    if jobs.soft_time_limit_seconds == 0 || jobs.hard_time_limit_seconds == 0 {
        return Err(invalid("time limits must be greater than zero"));
    }
    if jobs.soft_time_limit_seconds >= jobs.hard_time_limit_seconds {
        return Err(invalid(&format!(
            "soft time limit ({}s) must be below the hard time limit ({}s)",
            jobs.soft_time_limit_seconds, jobs.hard_time_limit_seconds
        )));
    }

    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        return Err(invalid("chunking.chunk_size must be greater than zero"));
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        return Err(invalid(&format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            chunking.chunk_overlap, chunking.chunk_size
        )));
    }

    let uploads = &config.uploads;
    if uploads.max_file_size_bytes == 0 {
        return Err(invalid("uploads.max_file_size_bytes must be greater than zero"));
    }
    if uploads.allowed_extensions.is_empty() {
        return Err(invalid("uploads.allowed_extensions must not be empty"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "jobs": { "ttl_seconds": 3600, "max_retries": 5, "workers": 4 },
            "uploads": { "directory": "/srv/uploads", "allowed_extensions": ["pdf"] },
            "chunking": { "chunk_size": 500, "chunk_overlap": 50 },
            "database": { "path": "/srv/jobs.db" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.jobs.ttl_seconds, 3600);
        assert_eq!(config.jobs.max_retries, 5);
        assert_eq!(config.jobs.retry_backoff_seconds, 60);
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.uploads.directory, PathBuf::from("/srv/uploads"));
        assert_eq!(config.uploads.allowed_extensions, vec!["pdf"]);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.database.path, Some(PathBuf::from("/srv/jobs.db")));
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let result = load_config_from_str(r#"{ "jobs": { "ttl": 5 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_type_fails_schema() {
        let result = load_config_from_str(r#"{ "chunking": { "chunk_size": "big" } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_overlap_must_be_below_size() {
        let result =
            load_config_from_str(r#"{ "chunking": { "chunk_size": 100, "chunk_overlap": 100 } }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_soft_limit_must_be_below_hard_limit() {
        let result = load_config_from_str(
            r#"{ "jobs": { "soft_time_limit_seconds": 600, "hard_time_limit_seconds": 600 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/definitely/not/here.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("DOCINGEST_JOB_TTL_SECONDS", "120"),
                ("DOCINGEST_MAX_RETRIES", "1"),
                ("DOCINGEST_ALLOWED_EXTENSIONS", "PDF, .pptx,txt"),
                ("DOCINGEST_UPLOAD_DIR", "/tmp/in"),
                ("DOCINGEST_WORKERS", " 3 "),
            ]),
        )
        .unwrap();

        assert_eq!(config.jobs.ttl_seconds, 120);
        assert_eq!(config.jobs.max_retries, 1);
        assert_eq!(config.jobs.workers, 3);
        assert_eq!(config.uploads.allowed_extensions, vec!["pdf", "pptx", "txt"]);
        assert_eq!(config.uploads.directory, PathBuf::from("/tmp/in"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, lookup(&[("DOCINGEST_CHUNK_SIZE", "lots")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { name, value } => {
                assert_eq!(name, "DOCINGEST_CHUNK_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("Expected InvalidEnv, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_load_with_env_reads_process_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docingest.json");
        std::fs::write(&path, r#"{ "jobs": { "max_retries": 2 } }"#).unwrap();

        std::env::set_var("DOCINGEST_RETRY_BACKOFF_SECONDS", "5");
        let config = load_with_env(Some(&path));
        std::env::remove_var("DOCINGEST_RETRY_BACKOFF_SECONDS");

        let config = config.unwrap();
        assert_eq!(config.jobs.max_retries, 2);
        assert_eq!(config.jobs.retry_backoff_seconds, 5);
    }

    #[test]
    #[serial]
    fn test_load_with_env_validates_overrides() {
        std::env::set_var("DOCINGEST_CHUNK_OVERLAP", "5000");
        let result = load_with_env(None);
        std::env::remove_var("DOCINGEST_CHUNK_OVERLAP");

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
