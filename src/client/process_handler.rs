//! # FOSSology Process Handler
//!
//! Concrete [`ExternalToolClient`]. Every `start_or_resume` call looks at the
//! furthest step of the resource's snapshot and advances it by at most one
//! transition:
//!
//! | furthest step | status  | action                                              |
//! |---------------|---------|-----------------------------------------------------|
//! | Upload        | New     | reuse an earlier upload by SHA-1 or upload payload  |
//! | Upload        | InWork  | leftover of an interrupted call, retried as New     |
//! | Upload        | Done    | append Scan, start the scan job                     |
//! | Scan          | InWork  | query the job; Completed/Failed finish the step     |
//! | Scan          | Done    | append Report and start it (successful scans only)  |
//! | Report        | New     | start report generation                             |
//! | Report        | InWork  | download, store as attachment, finish the process   |
//!
//! Steps are marked InWork and persisted before the slow tool call, and fall
//! back to New when the call fails, so the next invocation retries them.
//!
//! With report download disabled, a successful scan is not followed by a
//! Report step; [`FossologyProcessHandler::trigger_report_generation`] appends
//! it on request.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fossology::{FossologyApi, ReportDownload};
use super::{
    ExternalToolClient, JobStatus, ReportStatusResponse, RequestStatus, ScanStatusResponse,
    UnpackStatusResponse,
};
use crate::constants::fossology::{SCAN_COMPLETED_RESULT, UNKNOWN_FILENAME};
use crate::database::{AttachmentRepository, SharedSnapshotStore};
use crate::error::{StoreError, ToolError, ToolResult};
use crate::logging::log_tool_operation;
use crate::models::{PayloadAttachment, ProcessSnapshot, ProcessStep};
use crate::state_machine::{ProcessState, StepName, StepState};

pub struct FossologyProcessHandler {
    api: Arc<dyn FossologyApi>,
    store: SharedSnapshotStore,
    attachments: Arc<dyn AttachmentRepository>,
    report_download: bool,
}

impl FossologyProcessHandler {
    pub fn new(
        api: Arc<dyn FossologyApi>,
        store: SharedSnapshotStore,
        attachments: Arc<dyn AttachmentRepository>,
    ) -> Self {
        Self {
            api,
            store,
            attachments,
            report_download: true,
        }
    }

    /// Enable or disable the automatic Report step after a successful scan
    pub fn with_report_download(mut self, enabled: bool) -> Self {
        self.report_download = enabled;
        self
    }

    /// Restart report generation for a process whose report step exists
    ///
    /// With report download disabled, a scanned process without a Report step
    /// gets one appended. Returns `Failure` when the payload has not been
    /// uploaded and scanned yet.
    pub async fn trigger_report_generation(&self, resource_id: &str) -> ToolResult<RequestStatus> {
        let Some(mut snapshot) = self.current_snapshot(resource_id).await? else {
            info!(resource_id = %resource_id, "No active process, report generation not triggered");
            return Ok(RequestStatus::Failure);
        };

        snapshot.ensure_step_order();
        let scanned = snapshot
            .step(StepName::Scan)
            .is_some_and(|scan| scan.is_successful());
        if !self.report_download && scanned && snapshot.step(StepName::Report).is_none() {
            snapshot
                .push_step(ProcessStep::new(StepName::Report))
                .map_err(|e| ToolError::Validation(e.to_string()))?;
        }

        let Some(report) = snapshot.step_mut(StepName::Report) else {
            info!(
                resource_id = %resource_id,
                "Source is either not yet uploaded or not yet scanned"
            );
            return Ok(RequestStatus::Failure);
        };

        *report = ProcessStep::new(StepName::Report);
        snapshot.status = ProcessState::InWork;
        self.handle_report_step(&mut snapshot).await?;
        self.persist(&mut snapshot).await?;

        log_tool_operation("trigger_report_generation", resource_id, "success", None);
        Ok(RequestStatus::Success)
    }

    async fn current_snapshot(&self, resource_id: &str) -> ToolResult<Option<ProcessSnapshot>> {
        Ok(self
            .store
            .load(resource_id)
            .await?
            .filter(|snapshot| !snapshot.status.is_outdated()))
    }

    async fn single_source_attachment(&self, resource_id: &str) -> ToolResult<PayloadAttachment> {
        let mut attachments = self.attachments.source_attachments(resource_id).await?;
        if attachments.len() != 1 {
            return Err(ToolError::Validation(format!(
                "Resource {resource_id} must have exactly one source attachment, but has {}",
                attachments.len()
            )));
        }
        Ok(attachments.remove(0))
    }

    fn new_process(
        resource_id: &str,
        generation: u64,
        attachment: &PayloadAttachment,
    ) -> ProcessSnapshot {
        let mut snapshot = ProcessSnapshot::new(resource_id, generation);
        snapshot.attachment_id = Some(attachment.content_id.clone());
        snapshot.attachment_hash = Some(attachment.sha1.clone());
        snapshot.steps.push(ProcessStep::new(StepName::Upload));
        snapshot
    }

    async fn persist(&self, snapshot: &mut ProcessSnapshot) -> ToolResult<()> {
        snapshot.touch();
        self.store.save(snapshot).await?;
        Ok(())
    }

    fn upload_result(snapshot: &ProcessSnapshot) -> ToolResult<String> {
        snapshot
            .step(StepName::Upload)
            .and_then(|step| step.result.clone())
            .ok_or_else(|| {
                ToolError::Validation(format!(
                    "Process of {} has no upload id",
                    snapshot.resource_id
                ))
            })
    }

    fn step_mut(snapshot: &mut ProcessSnapshot, name: StepName) -> ToolResult<&mut ProcessStep> {
        let resource_id = snapshot.resource_id.clone();
        snapshot.step_mut(name).ok_or_else(|| {
            ToolError::Validation(format!("Process of {resource_id} has no {name} step"))
        })
    }

    /// Fail when the stored process was invalidated or restarted after `snapshot` was loaded
    async fn ensure_not_superseded(&self, snapshot: &ProcessSnapshot) -> ToolResult<()> {
        let Some(stored) = self.store.load(&snapshot.resource_id).await? else {
            return Ok(());
        };
        if stored.generation > snapshot.generation {
            return Err(StoreError::StaleGeneration {
                resource_id: snapshot.resource_id.clone(),
                attempted: snapshot.generation,
                stored: stored.generation,
            }
            .into());
        }
        if stored.generation == snapshot.generation && stored.status.is_outdated() {
            return Err(StoreError::Superseded {
                resource_id: snapshot.resource_id.clone(),
                generation: snapshot.generation,
            }
            .into());
        }
        Ok(())
    }

    /// Set a step InWork and persist before the tool call
    async fn claim_step(&self, snapshot: &mut ProcessSnapshot, name: StepName) -> ToolResult<()> {
        snapshot.status = ProcessState::InWork;
        Self::step_mut(snapshot, name)?.status = StepState::InWork;
        self.persist(snapshot).await
    }

    async fn handle_upload_step(
        &self,
        snapshot: &mut ProcessSnapshot,
        attachment: &PayloadAttachment,
        note: Option<&str>,
    ) -> ToolResult<()> {
        let resource_id = snapshot.resource_id.clone();
        let step = Self::step_mut(snapshot, StepName::Upload)?;
        if step.status == StepState::InWork {
            match step.correlation_id.clone() {
                Some(upload_id) => {
                    step.result = Some(upload_id);
                    step.finish();
                }
                None => {
                    warn!(
                        resource_id = %resource_id,
                        "Upload step left in work without an upload id, step reset to New"
                    );
                    step.status = StepState::New;
                }
            }
        }

        let status = step.status;
        match status {
            StepState::New | StepState::InWork => {
                self.claim_step(snapshot, StepName::Upload).await?;

                let filename = if attachment.filename.trim().is_empty() {
                    UNKNOWN_FILENAME
                } else {
                    attachment.filename.as_str()
                };

                let upload_id = match self.api.find_existing_upload(&attachment.sha1, filename).await {
                    Ok(Some(existing)) => {
                        info!(
                            resource_id = %resource_id,
                            upload_id = %existing,
                            "Reusing earlier upload of the same archive"
                        );
                        Ok(existing)
                    }
                    Ok(None) => self.upload_payload(attachment, filename, note).await,
                    Err(e) => {
                        warn!(
                            resource_id = %resource_id,
                            error = %e,
                            "Upload lookup by SHA-1 failed, uploading payload"
                        );
                        self.upload_payload(attachment, filename, note).await
                    }
                };

                let step = Self::step_mut(snapshot, StepName::Upload)?;
                match upload_id {
                    Ok(upload_id) => {
                        step.correlation_id = Some(upload_id.clone());
                        step.result = Some(upload_id);
                        step.finish();
                    }
                    Err(e) => {
                        warn!(
                            resource_id = %resource_id,
                            error = %e,
                            "Upload failed, step reset to New"
                        );
                        step.status = StepState::New;
                        step.result = None;
                    }
                }
                Ok(())
            }
            StepState::Done => {
                snapshot
                    .push_step(ProcessStep::new(StepName::Scan))
                    .map_err(|e| ToolError::Validation(e.to_string()))?;
                self.handle_scan_step(snapshot).await
            }
        }
    }

    async fn upload_payload(
        &self,
        attachment: &PayloadAttachment,
        filename: &str,
        note: Option<&str>,
    ) -> ToolResult<String> {
        let content = self.attachments.read_content(&attachment.content_id).await?;
        self.api.upload_file(filename, content, note).await
    }

    async fn handle_scan_step(&self, snapshot: &mut ProcessSnapshot) -> ToolResult<()> {
        let upload_id = Self::upload_result(snapshot)?;

        match Self::step_mut(snapshot, StepName::Scan)?.status {
            StepState::New => {
                self.claim_step(snapshot, StepName::Scan).await?;
                let started = self.api.start_scan(&upload_id).await;

                let step = Self::step_mut(snapshot, StepName::Scan)?;
                match started {
                    Ok(job_id) => {
                        debug!(upload_id = %upload_id, job_id = %job_id, "Scan triggered");
                        step.correlation_id = Some(job_id);
                        step.result = None;
                    }
                    Err(e) => {
                        warn!(upload_id = %upload_id, error = %e, "Starting scan failed, step reset to New");
                        step.status = StepState::New;
                        step.correlation_id = None;
                        step.result = None;
                    }
                }
                Ok(())
            }
            StepState::InWork => {
                let step = Self::step_mut(snapshot, StepName::Scan)?;
                let Some(job_id) = step.correlation_id.clone() else {
                    step.status = StepState::New;
                    return Ok(());
                };

                let status = self.api.scan_status(&job_id).await?;
                let step = Self::step_mut(snapshot, StepName::Scan)?;
                match status.status {
                    JobStatus::Completed => {
                        step.result = Some(SCAN_COMPLETED_RESULT.to_string());
                        step.finish();
                    }
                    JobStatus::Failed => {
                        warn!(job_id = %job_id, "Scan job failed");
                        step.result = None;
                        step.finish();
                    }
                    JobStatus::Queued | JobStatus::Processing => {
                        debug!(job_id = %job_id, status = %status.status, eta = ?status.eta, "Scan still running");
                    }
                }
                Ok(())
            }
            StepState::Done => {
                let successful = snapshot
                    .step(StepName::Scan)
                    .is_some_and(|scan| scan.is_successful());
                if successful && !self.report_download {
                    debug!(
                        resource_id = %snapshot.resource_id,
                        "Report download disabled, no Report step appended"
                    );
                    Ok(())
                } else if successful {
                    snapshot
                        .push_step(ProcessStep::new(StepName::Report))
                        .map_err(|e| ToolError::Validation(e.to_string()))?;
                    self.handle_report_step(snapshot).await
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn handle_report_step(&self, snapshot: &mut ProcessSnapshot) -> ToolResult<()> {
        match Self::step_mut(snapshot, StepName::Report)?.status {
            StepState::New => {
                let upload_id = Self::upload_result(snapshot)?;
                self.claim_step(snapshot, StepName::Report).await?;
                let started = self.api.start_report(&upload_id).await;

                let step = Self::step_mut(snapshot, StepName::Report)?;
                match started {
                    Ok(report_id) => {
                        debug!(upload_id = %upload_id, report_id = %report_id, "Report triggered");
                        step.correlation_id = Some(report_id);
                    }
                    Err(e) => {
                        warn!(upload_id = %upload_id, error = %e, "Starting report failed, step reset to New");
                        step.status = StepState::New;
                        step.correlation_id = None;
                    }
                }
                Ok(())
            }
            StepState::InWork => {
                let step = Self::step_mut(snapshot, StepName::Report)?;
                let Some(report_id) = step.correlation_id.clone() else {
                    step.status = StepState::New;
                    return Ok(());
                };

                match self.api.download_report(&report_id).await? {
                    ReportDownload::Ready(content) => {
                        self.ensure_not_superseded(snapshot).await?;
                        let filename = report_filename(&snapshot.resource_id);
                        let content_id = self
                            .attachments
                            .store_report(&snapshot.resource_id, &filename, content)
                            .await?;

                        let step = Self::step_mut(snapshot, StepName::Report)?;
                        step.result = Some(content_id.clone());
                        step.finish();
                        snapshot.status = ProcessState::Done;
                        info!(
                            resource_id = %snapshot.resource_id,
                            content_id = %content_id,
                            "Report stored, process done"
                        );
                    }
                    ReportDownload::NotReady { retry_after } => {
                        debug!(report_id = %report_id, ?retry_after, "Report not ready");
                    }
                }
                Ok(())
            }
            StepState::Done => Ok(()),
        }
    }
}

/// `<resource>-<yyyyMMdd-HHmm>-SPDX.rdf`
fn report_filename(resource_id: &str) -> String {
    format!("{resource_id}-{}-SPDX.rdf", Utc::now().format("%Y%m%d-%H%M"))
}

#[async_trait]
impl ExternalToolClient for FossologyProcessHandler {
    async fn start_or_resume(
        &self,
        resource_id: &str,
        note: Option<&str>,
    ) -> ToolResult<ProcessSnapshot> {
        let attachment = self.single_source_attachment(resource_id).await?;

        let mut snapshot = match self.store.load(resource_id).await? {
            Some(existing) if !existing.status.is_outdated() => {
                if existing.attachment_id.as_deref() != Some(attachment.content_id.as_str())
                    || existing.attachment_hash.as_deref() != Some(attachment.sha1.as_str())
                {
                    return Err(ToolError::Validation(format!(
                        "Source attachment of {resource_id} does not match the running process"
                    )));
                }
                existing
            }
            previous => {
                let generation = previous.map_or(0, |p| p.generation) + 1;
                info!(resource_id = %resource_id, generation, "Creating new scan process");
                Self::new_process(resource_id, generation, &attachment)
            }
        };

        snapshot.ensure_step_order();
        if snapshot.steps.is_empty() {
            snapshot.steps.push(ProcessStep::new(StepName::Upload));
        }

        let furthest = snapshot
            .furthest_step()
            .map(|step| step.name)
            .unwrap_or(StepName::Upload);

        match furthest {
            StepName::Upload => {
                self.handle_upload_step(&mut snapshot, &attachment, note)
                    .await?
            }
            StepName::Scan => self.handle_scan_step(&mut snapshot).await?,
            StepName::Report => self.handle_report_step(&mut snapshot).await?,
        }

        self.persist(&mut snapshot).await?;
        log_tool_operation(
            "start_or_resume",
            resource_id,
            &snapshot.status.to_string(),
            snapshot.furthest_step().map(|step| step.name.to_string()).as_deref(),
        );
        Ok(snapshot)
    }

    async fn invalidate(&self, resource_id: &str) -> ToolResult<RequestStatus> {
        let Some(mut snapshot) = self.current_snapshot(resource_id).await? else {
            info!(resource_id = %resource_id, "No active process, nothing to mark outdated");
            return Ok(RequestStatus::Success);
        };

        snapshot.status = ProcessState::Outdated;
        self.persist(&mut snapshot).await?;
        info!(resource_id = %resource_id, generation = snapshot.generation, "Process marked outdated");
        Ok(RequestStatus::Success)
    }

    async fn check_unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse> {
        self.api.unpack_status(upload_id).await
    }

    async fn check_scan_status(&self, scan_id: &str) -> ToolResult<ScanStatusResponse> {
        self.api.scan_status(scan_id).await
    }

    async fn check_report_generation_status(
        &self,
        report_id: &str,
    ) -> ToolResult<ReportStatusResponse> {
        self.api.report_status(report_id).await
    }

    async fn check_connection(&self) -> ToolResult<RequestStatus> {
        Ok(RequestStatus::from(self.api.check_connection().await?))
    }
}
