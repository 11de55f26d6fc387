//! # External Tool Client
//!
//! Trigger and status-check calls against the scanning service, as seen by the
//! orchestrator. [`ExternalToolClient`] is the seam the pipeline drives;
//! [`process_handler::FossologyProcessHandler`] implements it on top of the
//! low-level REST wrapper in [`fossology`].
//!
//! ## Architecture
//!
//! ```text
//! ProcessOrchestrator
//!   └── ExternalToolClient            (trigger + status checks)
//!         └── FossologyProcessHandler (one step per start_or_resume call)
//!               ├── FossologyApi      (REST calls, FossologyRestClient)
//!               ├── SnapshotStore     (process state)
//!               └── AttachmentRepository (payload + reports)
//! ```

pub mod fossology;
pub mod process_handler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::job_status;
use crate::error::{ToolError, ToolResult};
use crate::models::ProcessSnapshot;

pub use fossology::{FossologyApi, FossologyRestClient, ReportDownload};
pub use process_handler::FossologyProcessHandler;

/// Outcome of a fire-and-forget request to the tool or a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Failure,
}

impl RequestStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<bool> for RequestStatus {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Status of an unpack or scan job inside the tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed or Failed
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            job_status::QUEUED => Ok(Self::Queued),
            job_status::PROCESSING => Ok(Self::Processing),
            job_status::COMPLETED => Ok(Self::Completed),
            job_status::FAILED => Ok(Self::Failed),
            other => Err(ToolError::invalid_response(
                "status",
                format!("unknown job status '{other}'"),
            )),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Queued => job_status::QUEUED,
            Self::Processing => job_status::PROCESSING,
            Self::Completed => job_status::COMPLETED,
            Self::Failed => job_status::FAILED,
        };
        write!(f, "{value}")
    }
}

/// Unpack status of an upload
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackStatusResponse {
    pub status: JobStatus,
    /// Job entry as returned by the tool
    pub raw: serde_json::Value,
}

/// Status of a scan job
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStatusResponse {
    pub status: JobStatus,
    /// Remaining time the tool estimates for the job
    pub eta: Option<Duration>,
    pub raw: serde_json::Value,
}

/// Report generation runs as a job of its own and reports like a scan job
pub type ReportStatusResponse = ScanStatusResponse;

/// Trigger and status-check calls of the scanning service
#[async_trait]
pub trait ExternalToolClient: Send + Sync {
    /// Advance the resource's process by one step and return the resulting snapshot
    async fn start_or_resume(
        &self,
        resource_id: &str,
        note: Option<&str>,
    ) -> ToolResult<ProcessSnapshot>;

    /// Mark the resource's current process outdated
    async fn invalidate(&self, resource_id: &str) -> ToolResult<RequestStatus>;

    async fn check_unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse>;

    async fn check_scan_status(&self, scan_id: &str) -> ToolResult<ScanStatusResponse>;

    async fn check_report_generation_status(
        &self,
        report_id: &str,
    ) -> ToolResult<ReportStatusResponse>;

    async fn check_connection(&self) -> ToolResult<RequestStatus>;
}
