//! Error types for the scan process orchestrator.
//!
//! Synchronous API errors ([`OrchestrationError`]) are the only ones a trigger
//! caller ever sees. Everything that goes wrong inside a detached worker ends up
//! as a [`StageFailure`] that is logged and left behind in the snapshot.

use crate::database::AttachmentError;
use crate::state_machine::PipelineStage;
use thiserror::Error;

/// Errors returned synchronously by the orchestrator API
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Resource {resource_id} must have exactly one source attachment, but has {count}")]
    AttachmentCount { resource_id: String, count: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service unavailable: {0}")]
    ExternalServiceUnavailable(String),

    #[error("Attachment repository error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),

    #[error("External tool error: {0}")]
    Tool(#[from] ToolError),
}

impl OrchestrationError {
    /// Whether the error stems from invalid caller input (as opposed to infrastructure)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::AttachmentCount { .. } | Self::Validation(_))
    }
}

/// Errors of the snapshot store collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Stale write for {resource_id}: generation {attempted} is older than stored generation {stored}")]
    StaleGeneration {
        resource_id: String,
        attempted: u64,
        stored: u64,
    },

    #[error("Stale write for {resource_id}: generation {generation} was marked outdated")]
    Superseded { resource_id: String, generation: u64 },

    #[error("Snapshot not found for {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Errors of the external tool client and the scanning service behind it
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Tool configuration error: {0}")]
    Configuration(String),

    #[error("Invalid response: {field} - {reason}")]
    InvalidResponse { field: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Why a detached run stopped before completing the pipeline
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("Invalidation of the previous process failed: {0}")]
    Invalidation(String),

    #[error("Tool reported failure during {stage}")]
    ToolReportedFailure { stage: PipelineStage },

    #[error("Retries exhausted during {stage} after {attempts} attempts (last error: {last_error:?})")]
    RetriesExhausted {
        stage: PipelineStage,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("Run superseded: generation {expected} replaced by {found:?}")]
    Superseded { expected: u64, found: Option<u64> },

    #[error("Tool error during {stage}: {source}")]
    Tool {
        stage: PipelineStage,
        #[source]
        source: ToolError,
    },

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
pub type ToolResult<T> = std::result::Result<T, ToolError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
