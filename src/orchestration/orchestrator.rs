//! # Process Orchestrator
//!
//! Public entry point of the crate. `run_process` validates synchronously,
//! claims the resource's lock and hands the pipeline to a detached tokio task;
//! callers observe progress only through `check_status`, which combines the
//! lock registry with the persisted snapshot.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::pipeline::PipelineRun;
use super::types::{ProcessStatusReport, StatusVerdict, TriggerOutcome};
use crate::client::{ExternalToolClient, RequestStatus};
use crate::config::{OrchestratorConfig, PollingConfig};
use crate::database::{AttachmentRepository, SharedSnapshotStore};
use crate::error::{OrchestrationError, Result};
use crate::models::ProcessSnapshot;
use crate::registry::{LockRejection, ResourceLockRegistry};
use crate::state_machine::StepName;

#[derive(Clone)]
pub struct ProcessOrchestrator {
    client: Arc<dyn ExternalToolClient>,
    store: SharedSnapshotStore,
    attachments: Arc<dyn AttachmentRepository>,
    registry: ResourceLockRegistry,
    polling: PollingConfig,
    report_download: bool,
}

impl std::fmt::Debug for ProcessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOrchestrator")
            .field("registry", &self.registry)
            .field("polling", &self.polling)
            .field("report_download", &self.report_download)
            .finish_non_exhaustive()
    }
}

impl ProcessOrchestrator {
    pub fn new(
        client: Arc<dyn ExternalToolClient>,
        store: SharedSnapshotStore,
        attachments: Arc<dyn AttachmentRepository>,
        registry: ResourceLockRegistry,
        polling: PollingConfig,
    ) -> Self {
        Self {
            client,
            store,
            attachments,
            registry,
            polling,
            report_download: true,
        }
    }

    /// Whether runs continue past a successful scan to download the report
    pub fn with_report_download(mut self, enabled: bool) -> Self {
        self.report_download = enabled;
        self
    }

    /// Build an orchestrator with registry capacity and poll policies from `config`
    pub fn from_config(
        config: &OrchestratorConfig,
        client: Arc<dyn ExternalToolClient>,
        store: SharedSnapshotStore,
        attachments: Arc<dyn AttachmentRepository>,
    ) -> Self {
        Self::new(
            client,
            store,
            attachments,
            ResourceLockRegistry::new(config.registry.max_concurrent_runs),
            config.polling.clone(),
        )
        .with_report_download(config.tool.report_download_enabled)
    }

    pub fn registry(&self) -> &ResourceLockRegistry {
        &self.registry
    }

    /// Start (or resume) the scan pipeline of `resource_id` in the background
    ///
    /// Checks run in order: attachment count, tool connectivity, lock
    /// acquisition. Nothing is spawned unless all of them pass.
    pub async fn run_process(
        &self,
        resource_id: &str,
        force_outdated: bool,
        note: Option<String>,
    ) -> Result<TriggerOutcome> {
        if resource_id.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "resource id must not be empty".to_string(),
            ));
        }

        let attachments = self.attachments.source_attachments(resource_id).await?;
        let payload = match attachments.as_slice() {
            [payload] => payload.clone(),
            _ => {
                return Err(OrchestrationError::AttachmentCount {
                    resource_id: resource_id.to_string(),
                    count: attachments.len(),
                })
            }
        };

        match self.client.check_connection().await {
            Ok(RequestStatus::Success) => {}
            Ok(RequestStatus::Failure) => {
                return Err(OrchestrationError::ExternalServiceUnavailable(
                    "connection check failed".to_string(),
                ))
            }
            Err(e) => return Err(OrchestrationError::ExternalServiceUnavailable(e.to_string())),
        }

        let lease = match self.registry.try_acquire(resource_id) {
            Ok(lease) => lease,
            Err(LockRejection::AtCapacity) => {
                info!(
                    resource_id = %resource_id,
                    capacity = self.registry.capacity(),
                    "Run rejected, registry at capacity"
                );
                return Ok(TriggerOutcome::TooManyRequests);
            }
            Err(LockRejection::AlreadyHeld) => {
                info!(resource_id = %resource_id, "Run rejected, resource already processing");
                return Ok(TriggerOutcome::Busy);
            }
        };

        let run_id = Uuid::new_v4();
        let run = PipelineRun {
            run_id,
            resource_id: resource_id.to_string(),
            payload_size_bytes: payload.size_bytes,
            force_outdated,
            note,
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            polling: self.polling.clone(),
            report_download: self.report_download,
        };

        info!(
            resource_id = %resource_id,
            run_id = %run_id,
            force_outdated,
            payload_size_bytes = payload.size_bytes,
            "🚀 ORCHESTRATOR: Run accepted"
        );
        tokio::spawn(run.execute(lease));

        Ok(TriggerOutcome::Accepted { run_id })
    }

    /// Processing while a run holds the lock, Success for a complete snapshot
    /// (or a scanned one when report download is disabled), Failure otherwise
    pub async fn check_status(&self, resource_id: &str) -> Result<ProcessStatusReport> {
        let processing = self.registry.is_locked(resource_id);
        let snapshot = self.store.load(resource_id).await?;

        let verdict = if processing {
            StatusVerdict::Processing
        } else if snapshot
            .as_ref()
            .is_some_and(|s| self.finished_successfully(s))
        {
            StatusVerdict::Success
        } else {
            StatusVerdict::Failure
        };

        debug!(resource_id = %resource_id, verdict = %verdict, "Status checked");
        Ok(ProcessStatusReport { verdict, snapshot })
    }

    fn finished_successfully(&self, snapshot: &ProcessSnapshot) -> bool {
        if snapshot.status.is_outdated() {
            return false;
        }
        if snapshot.is_complete() {
            return true;
        }
        !self.report_download
            && snapshot.step(StepName::Report).is_none()
            && snapshot
                .step(StepName::Scan)
                .is_some_and(|scan| scan.is_successful())
    }

    /// Invalidate the resource's process without running the pipeline
    pub async fn mark_outdated(&self, resource_id: &str) -> Result<RequestStatus> {
        let status = self.client.invalidate(resource_id).await?;
        info!(resource_id = %resource_id, status = %status, "Mark outdated requested");
        Ok(status)
    }

    /// Number of runs currently holding a lock
    pub fn active_runs(&self) -> usize {
        self.registry.held_count()
    }
}
