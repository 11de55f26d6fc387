//! # Orchestrator Configuration System
//!
//! Environment-aware configuration for the scan process orchestrator. Values come
//! from `config/scan-orchestrator.yaml`, an optional per-environment override
//! file and `SCAN_ORCHESTRATOR__*` environment variables, in that order.
//! Every section has defaults matching the documented pipeline behavior, so an
//! empty configuration is valid apart from the tool connection settings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scan_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let capacity = manager.config().registry.max_concurrent_runs;
//! let attempts = manager.config().polling.max_attempts;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{polling, system};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring scan-orchestrator.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Resource lock registry settings
    pub registry: RegistryConfig,

    /// Poll/retry bounds for the pipeline stages
    pub polling: PollingConfig,

    /// Scanning service connection settings
    pub tool: ToolConfig,

    /// Snapshot persistence settings
    pub database: DatabaseConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Validate configuration values that would make the orchestrator unusable
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.registry.max_concurrent_runs == 0 {
            return Err(ConfigurationError::invalid_value(
                "registry.max_concurrent_runs",
                "0",
                "at least one concurrent run must be allowed",
            ));
        }

        if self.polling.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.max_attempts",
                "0",
                "every stage needs at least one attempt",
            ));
        }

        if self.polling.max_eta_seconds < polling::MIN_ETA.as_secs() {
            return Err(ConfigurationError::invalid_value(
                "polling.max_eta_seconds",
                self.polling.max_eta_seconds.to_string(),
                "maximum ETA must be at least one second",
            ));
        }

        if self.tool.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "tool.request_timeout_ms",
                "0",
                "request timeout must be greater than 0",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Resource lock registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of simultaneously running pipelines
    pub max_concurrent_runs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: system::MAX_CONCURRENT_RUNS,
        }
    }
}

/// Poll/retry configuration shared by the four pipeline call sites
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub max_attempts: u32,
    pub small_payload_threshold_bytes: u64,
    pub small_payload_interval_seconds: u64,
    pub seconds_per_megabyte: u64,
    pub trigger_interval_seconds: u64,
    pub report_interval_seconds: u64,
    /// Upper bound applied to scan ETAs reported by the tool
    pub max_eta_seconds: u64,
}

impl PollingConfig {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_seconds)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds)
    }

    pub fn max_eta(&self) -> Duration {
        Duration::from_secs(self.max_eta_seconds)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: polling::MAX_ATTEMPTS,
            small_payload_threshold_bytes: polling::SMALL_PAYLOAD_THRESHOLD_BYTES,
            small_payload_interval_seconds: polling::SMALL_PAYLOAD_INTERVAL.as_secs(),
            seconds_per_megabyte: polling::SECONDS_PER_MEGABYTE,
            trigger_interval_seconds: polling::TRIGGER_INTERVAL.as_secs(),
            report_interval_seconds: polling::REPORT_INTERVAL.as_secs(),
            max_eta_seconds: polling::MAX_ETA.as_secs(),
        }
    }
}

/// Scanning service (FOSSology REST API) connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Base URL of the REST API, e.g. `http://fossology:8081/repo/api/v1`
    pub base_url: String,
    pub access_token: String,
    /// Folder uploads are placed in
    pub folder_id: String,
    pub request_timeout_ms: u64,
    /// When off, runs end after a successful scan and reports are only
    /// generated on explicit request
    pub report_download_enabled: bool,
}

impl ToolConfig {
    /// Base URL guaranteed to end with a slash
    pub fn base_url_with_slash(&self) -> String {
        let trimmed = self.base_url.trim();
        if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        }
    }

    /// Whether enough is configured to talk to the service at all
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.access_token.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            folder_id: String::new(),
            request_timeout_ms: 30_000,
            report_download_enabled: true,
        }
    }
}

/// Snapshot persistence configuration
///
/// Without a URL the in-memory store is used.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines on the console instead of human readable output
    pub json: bool,
    /// Also write JSON logs into this directory
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
