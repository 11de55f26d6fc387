//! Scripted stand-in for the FOSSology REST API.
//!
//! Every call answers from a script that tests can change while runs are in
//! flight, and every call is counted.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scan_orchestrator::client::{
    ExternalToolClient, FossologyApi, JobStatus, ReportDownload, ReportStatusResponse,
    RequestStatus, ScanStatusResponse, UnpackStatusResponse,
};
use scan_orchestrator::error::{ToolError, ToolResult};
use scan_orchestrator::models::ProcessSnapshot;

#[derive(Debug)]
pub struct Script {
    pub connected: bool,
    pub existing_upload: Option<String>,
    /// Consumed front to back, then `unpack_default` applies
    pub unpack: VecDeque<ToolResult<JobStatus>>,
    pub unpack_default: JobStatus,
    pub scan: VecDeque<(JobStatus, Option<Duration>)>,
    pub scan_default: JobStatus,
    /// Number of downloads answered with "not ready" before the report is served
    pub report_not_ready: u32,
    /// How long each report download takes
    pub download_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connected: true,
            existing_upload: None,
            unpack: VecDeque::new(),
            unpack_default: JobStatus::Completed,
            scan: VecDeque::new(),
            scan_default: JobStatus::Completed,
            report_not_ready: 0,
            download_delay: None,
        }
    }
}

/// How often each endpoint was called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connection_checks: u32,
    pub upload_lookups: u32,
    pub uploads: u32,
    pub scans_started: u32,
    pub scan_polls: u32,
    pub unpack_polls: u32,
    pub reports_started: u32,
    pub report_status_checks: u32,
    pub downloads: u32,
}

#[derive(Debug)]
pub struct ScriptedFossology {
    script: Mutex<Script>,
    calls: Mutex<CallCounts>,
    next_id: AtomicU64,
}

impl ScriptedFossology {
    pub fn new() -> Self {
        Self::with_script(Script::default())
    }

    pub fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(CallCounts::default()),
            next_id: AtomicU64::new(100),
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut Script)) {
        change(&mut self.script.lock());
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock()
    }

    fn count(&self, bump: impl FnOnce(&mut CallCounts)) {
        bump(&mut self.calls.lock());
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl FossologyApi for ScriptedFossology {
    async fn check_connection(&self) -> ToolResult<bool> {
        self.count(|c| c.connection_checks += 1);
        Ok(self.script.lock().connected)
    }

    async fn find_existing_upload(&self, _sha1: &str, _filename: &str) -> ToolResult<Option<String>> {
        self.count(|c| c.upload_lookups += 1);
        Ok(self.script.lock().existing_upload.clone())
    }

    async fn upload_file(
        &self,
        _filename: &str,
        _content: Vec<u8>,
        _description: Option<&str>,
    ) -> ToolResult<String> {
        self.count(|c| c.uploads += 1);
        Ok(self.next_id())
    }

    async fn start_scan(&self, _upload_id: &str) -> ToolResult<String> {
        self.count(|c| c.scans_started += 1);
        Ok(self.next_id())
    }

    async fn scan_status(&self, _job_id: &str) -> ToolResult<ScanStatusResponse> {
        self.count(|c| c.scan_polls += 1);
        let mut script = self.script.lock();
        let (status, eta) = script
            .scan
            .pop_front()
            .unwrap_or((script.scan_default, None));
        Ok(ScanStatusResponse {
            status,
            eta,
            raw: serde_json::json!({"status": status.to_string()}),
        })
    }

    async fn unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse> {
        self.count(|c| c.unpack_polls += 1);
        let mut script = self.script.lock();
        let status = script.unpack.pop_front().unwrap_or(Ok(script.unpack_default))?;
        Ok(UnpackStatusResponse {
            status,
            raw: serde_json::json!({"uploadId": upload_id, "status": status.to_string()}),
        })
    }

    async fn start_report(&self, _upload_id: &str) -> ToolResult<String> {
        self.count(|c| c.reports_started += 1);
        Ok(self.next_id())
    }

    async fn report_status(&self, _report_id: &str) -> ToolResult<ReportStatusResponse> {
        self.count(|c| c.report_status_checks += 1);
        let ready = self.script.lock().report_not_ready == 0;
        let status = if ready {
            JobStatus::Completed
        } else {
            JobStatus::Processing
        };
        Ok(ReportStatusResponse {
            status,
            eta: None,
            raw: serde_json::json!({"status": status.to_string()}),
        })
    }

    async fn download_report(&self, _report_id: &str) -> ToolResult<ReportDownload> {
        self.count(|c| c.downloads += 1);
        let delay = self.script.lock().download_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        if script.report_not_ready > 0 {
            script.report_not_ready -= 1;
            return Ok(ReportDownload::NotReady {
                retry_after: Some(Duration::from_secs(30)),
            });
        }
        Ok(ReportDownload::Ready(b"<rdf:RDF/>".to_vec()))
    }
}

/// Tool client whose invalidation always errors
pub struct FailingInvalidation {
    pub inner: Arc<dyn ExternalToolClient>,
}

#[async_trait]
impl ExternalToolClient for FailingInvalidation {
    async fn start_or_resume(
        &self,
        resource_id: &str,
        note: Option<&str>,
    ) -> ToolResult<ProcessSnapshot> {
        self.inner.start_or_resume(resource_id, note).await
    }

    async fn invalidate(&self, _resource_id: &str) -> ToolResult<RequestStatus> {
        Err(ToolError::api_error(500, "snapshot store unavailable"))
    }

    async fn check_unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse> {
        self.inner.check_unpack_status(upload_id).await
    }

    async fn check_scan_status(&self, scan_id: &str) -> ToolResult<ScanStatusResponse> {
        self.inner.check_scan_status(scan_id).await
    }

    async fn check_report_generation_status(
        &self,
        report_id: &str,
    ) -> ToolResult<ReportStatusResponse> {
        self.inner.check_report_generation_status(report_id).await
    }

    async fn check_connection(&self) -> ToolResult<RequestStatus> {
        self.inner.check_connection().await
    }
}
