//! Configuration Loader
//!
//! Environment-aware configuration loading. Discovers the base YAML file, merges the
//! environment override file and `SCAN_ORCHESTRATOR__*` variables on top, validates
//! the result and keeps a sanitized view around for logging.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Base configuration file name inside the configuration directory
pub const BASE_CONFIG_FILE: &str = "scan-orchestrator.yaml";

/// Variable selecting the environment override file
pub const ENVIRONMENT_VARIABLE: &str = "SCAN_ORCHESTRATOR_ENV";

/// Prefix of variables overriding single values, e.g. `SCAN_ORCHESTRATOR__TOOL__BASE_URL`
pub const ENV_OVERRIDE_PREFIX: &str = "SCAN_ORCHESTRATOR";

const ENV_OVERRIDE_SEPARATOR: &str = "__";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        let sanitized_config = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized_config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = environment,
            tool_configured = config.tool.is_configured(),
            max_concurrent_runs = config.registry.max_concurrent_runs,
            persistent_store = config.database.url.is_some(),
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, e.g. in tests
    pub fn from_config(config: OrchestratorConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Configuration with sensitive fields masked, safe to log
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment, defaulting to `development`
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "development".to_string())
            .to_lowercase()
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<OrchestratorConfig> {
        let base_path = config_directory.join(BASE_CONFIG_FILE);
        let environment_path = config_directory
            .join("environments")
            .join(format!("{environment}.yaml"));

        if !environment_path.exists() {
            debug!(
                "No environment override at {}, using base configuration only",
                environment_path.display()
            );
        }

        Config::builder()
            .add_source(File::from(base_path).required(false))
            .add_source(File::from(environment_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .prefix_separator(ENV_OVERRIDE_SEPARATOR)
                    .separator(ENV_OVERRIDE_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|merged| merged.try_deserialize::<OrchestratorConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    fn sanitize_config_for_logging(config: &OrchestratorConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential", "auth"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);

        // Database URLs carry credentials inline
        if let Some(url) = config_json.pointer_mut("/database/url") {
            if url.is_string() {
                *url = serde_json::Value::String("[MASKED]".to_string());
            }
        }

        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = Self::mask_value(val);
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

    fn mask_value(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) if s.is_empty() => {
                serde_json::Value::String("[EMPTY]".to_string())
            }
            serde_json::Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                // Show only first 2 and last 2 characters
                let masked = if chars.len() > 4 {
                    let head: String = chars[..2].iter().collect();
                    let tail: String = chars[chars.len() - 2..].iter().collect();
                    format!("{head}***{tail}")
                } else {
                    "***".to_string()
                };
                serde_json::Value::String(format!("[MASKED: {masked}]"))
            }
            serde_json::Value::Number(n) => serde_json::Value::String(format!("[MASKED: {n}]")),
            _ => serde_json::Value::String("[MASKED]".to_string()),
        }
    }
}
