//! # Structured Logging Module
//!
//! Console logging for the orchestrator plus an optional JSON log file, both
//! driven by the `logging` configuration section. `RUST_LOG` always wins over the
//! configured level.

use crate::config::LoggingConfig;
use crate::state_machine::PipelineStage;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize structured logging once per process
///
/// Later calls are no-ops, and an already installed global subscriber is kept.
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        let console_layer = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_filter(build_filter(&config.level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(build_filter(&config.level))
                .boxed()
        };
        layers.push(console_layer);

        let mut log_file = None;
        let mut directory_error = None;
        if let Some(directory) = &config.directory {
            let log_dir = PathBuf::from(directory);
            match fs::create_dir_all(&log_dir) {
                Ok(()) => {
                    let pid = process::id();
                    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                    let file_name = format!("{environment}.{pid}.{timestamp}.log");
                    let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

                    layers.push(
                        fmt::layer()
                            .with_writer(file_writer)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_ansi(false)
                            .json()
                            .with_filter(build_filter(&config.level))
                            .boxed(),
                    );

                    // Keep the writer alive for the lifetime of the process
                    std::mem::forget(guard);
                    log_file = Some(log_dir.join(file_name));
                }
                Err(e) => directory_error = Some(e.to_string()),
            }
        }

        if tracing_subscriber::registry().with(layers).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
            return;
        }

        if let Some(error) = directory_error {
            tracing::warn!(
                directory = ?config.directory,
                error = %error,
                "Log directory unavailable, logging to console only"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Log a pipeline stage transition of one run
pub fn log_stage_transition(
    resource_id: &str,
    run_id: Uuid,
    stage: PipelineStage,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        resource_id = %resource_id,
        run_id = %run_id,
        stage = %stage,
        status = %status,
        details = details,
        "🔁 STAGE_TRANSITION"
    );
}

/// Log a request sent to the scanning service
pub fn log_tool_operation(operation: &str, resource_id: &str, status: &str, details: Option<&str>) {
    tracing::debug!(
        operation = %operation,
        resource_id = %resource_id,
        status = %status,
        details = details,
        "🌐 TOOL_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config, "test");
        init_structured_logging(&config, "test");
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
