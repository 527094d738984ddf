//! Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment
//! detection, environment overlay merging and secret-safe logging.

use super::error::{ConfigResult, ConfigurationError};
use super::{StoreBackend, TaskRelayConfig};
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];
const CONFIG_FILE_NAMES: [&str; 2] = ["taskrelay.yaml", "taskrelay.yml"];

/// Loaded configuration plus the environment it was resolved for
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: TaskRelayConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Reads `TASKRELAY_CONFIG_PATH` if set, otherwise `config/taskrelay.yaml`
    /// relative to the working directory.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let path = match env::var("TASKRELAY_CONFIG_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::find_config_file(Path::new("config"))?,
        };
        Self::load_from_file(&path, &environment)
    }

    /// Load a specific file for an explicit environment.
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_file(path: &Path, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        debug!(
            environment = %environment,
            path = %path.display(),
            "Loading configuration"
        );

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;
        let mut config = Self::parse_with_environment(&content, environment)
            .map_err(|e| match e {
                ConfigurationError::InvalidYaml { error, .. } => {
                    ConfigurationError::invalid_yaml(path.display().to_string(), error)
                }
                other => other,
            })?;

        Self::apply_environment_variables(&mut config);
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            source: Some(path.to_path_buf()),
        };

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            backend = ?manager.config.database.backend,
            worker_version = %manager.config.worker.version,
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(manager))
    }

    /// Wrap an in-code configuration (defaults, tests)
    pub fn from_config(config: TaskRelayConfig, environment: impl Into<String>) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.into(),
            source: None,
        }))
    }

    /// Parse a YAML document and merge the section for `environment` over it
    pub fn parse_with_environment(content: &str, environment: &str) -> ConfigResult<TaskRelayConfig> {
        if !ENVIRONMENTS.contains(&environment) {
            return Err(ConfigurationError::unknown_environment(environment, &ENVIRONMENTS));
        }

        let mut yaml_data: YamlValue = serde_yaml::from_str(content)
            .map_err(|e| ConfigurationError::invalid_yaml("<inline>", e))?;

        if yaml_data.is_null() {
            yaml_data = YamlValue::Mapping(Default::default());
        }

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!(environment = %environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        // Remove environment sections before deserializing
        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for name in ENVIRONMENTS {
                map.remove(YamlValue::String(name.to_string()));
            }
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                "<inline>",
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &TaskRelayConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Configuration as JSON with sensitive fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut config_json = serde_json::json!(self.config);
        Self::sanitize_json_recursive(&mut config_json, &["password", "secret", "token", "url"]);
        config_json
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("TASKRELAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// `DATABASE_URL` overrides the file; its presence selects PostgreSQL
    fn apply_environment_variables(config: &mut TaskRelayConfig) {
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database.url = Some(url);
                config.database.backend = StoreBackend::Postgres;
            }
        }
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    /// Recursively sanitize sensitive fields in JSON configuration
    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && !val.is_null() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
