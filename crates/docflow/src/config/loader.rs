use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/docflow-config-v1.json");

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

/// Checks the constraints the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.queue.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "queue.worker_count must be greater than 0".to_string(),
        });
    }

    if config.queue.capacity == 0 {
        return Err(ConfigError::Validation {
            message: "queue.capacity must be greater than 0".to_string(),
        });
    }

    if config.queue.soft_time_limit_secs >= config.queue.hard_time_limit_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "queue.soft_time_limit_secs ({}) must be below queue.hard_time_limit_secs ({})",
                config.queue.soft_time_limit_secs, config.queue.hard_time_limit_secs
            ),
        });
    }

    if config.upload.max_file_size == 0 {
        return Err(ConfigError::Validation {
            message: "upload.max_file_size must be greater than 0".to_string(),
        });
    }

    for ext in &config.upload.allowed_extensions {
        if ext.is_empty() || ext.starts_with('.') || *ext != ext.to_lowercase() {
            return Err(ConfigError::Validation {
                message: format!(
                    "Invalid extension '{}': use lowercase without a leading dot",
                    ext
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.backoff_unit_ms, 1000);
        assert_eq!(config.queue.soft_time_limit_secs, 300);
        assert_eq!(config.queue.hard_time_limit_secs, 600);
        assert_eq!(config.upload.max_file_size, 20 * 1024 * 1024);
        assert!(config.upload.allowed_extensions.contains(&"pdf".to_string()));
        assert_eq!(config.storage.bucket, "test-bucket");
        assert_eq!(config.extraction.tokenizer, "cl100k_base");
        assert!(config.queue.worker_count > 0);
    }

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/docflow/docflow.db" },
            "storage": { "root": "/srv/uploads", "bucket": "docs" },
            "upload": { "max_file_size": 1024, "allowed_extensions": ["txt"] },
            "queue": { "worker_count": 2, "max_retries": 5, "backoff_unit_ms": 10 },
            "extraction": { "tokenizer": "characters" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.database.resolved_path(),
            std::path::PathBuf::from("/var/lib/docflow/docflow.db")
        );
        assert_eq!(config.storage.bucket, "docs");
        assert_eq!(config.upload.allowed_extensions, vec!["txt"]);
        assert_eq!(config.queue.worker_count, 2);

        let policy = config.queue.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff(0), std::time::Duration::from_millis(100));
    }

    #[test]
    fn test_schema_rejects_unknown_fields_and_types() {
        let result = load_config_from_str(r#"{ "queue": { "worker_count": "many" } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let result = load_config_from_str(r#"{ "mystery": true }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_soft_limit_must_be_below_hard_limit() {
        let result = load_config_from_str(
            r#"{ "queue": { "soft_time_limit_secs": 600, "hard_time_limit_secs": 600 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_extension_format_enforced() {
        let result =
            load_config_from_str(r#"{ "upload": { "allowed_extensions": [".pdf"] } }"#);
        assert!(result.is_err());
        let result = load_config_from_str(r#"{ "upload": { "allowed_extensions": ["PDF"] } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docflow.json");
        std::fs::write(&path, r#"{ "storage": { "bucket": "from-file" } }"#).unwrap();
        assert_eq!(load_config(&path).unwrap().storage.bucket, "from-file");

        let missing = load_config(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }
}
