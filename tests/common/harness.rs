//! Orchestrator wired to the scripted tool, in-memory stores and the real
//! process handler.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scan_orchestrator::client::{ExternalToolClient, FossologyProcessHandler};
use scan_orchestrator::config::OrchestratorConfig;
use scan_orchestrator::database::{InMemoryAttachmentRepository, InMemorySnapshotStore};
use scan_orchestrator::models::PayloadAttachment;
use scan_orchestrator::orchestration::{ProcessOrchestrator, ProcessStatusReport};

use super::scripted_fossology::ScriptedFossology;

pub const MB: usize = 1024 * 1024;

/// Upper bound of one-second status checks before a test gives up
const MAX_STATUS_CHECKS: u32 = 100_000;

pub struct TestHarness {
    pub api: Arc<ScriptedFossology>,
    pub store: Arc<InMemorySnapshotStore>,
    pub attachments: Arc<InMemoryAttachmentRepository>,
    pub handler: Arc<FossologyProcessHandler>,
    pub orchestrator: ProcessOrchestrator,
}

impl TestHarness {
    pub fn new(api: ScriptedFossology) -> Self {
        Self::build(api, OrchestratorConfig::default(), |handler| handler)
    }

    pub fn with_config(api: ScriptedFossology, config: OrchestratorConfig) -> Self {
        Self::build(api, config, |handler| handler)
    }

    /// Put a decorator between the orchestrator and the process handler
    pub fn with_client(
        api: ScriptedFossology,
        wrap: impl FnOnce(Arc<dyn ExternalToolClient>) -> Arc<dyn ExternalToolClient>,
    ) -> Self {
        Self::build(api, OrchestratorConfig::default(), wrap)
    }

    fn build(
        api: ScriptedFossology,
        config: OrchestratorConfig,
        wrap: impl FnOnce(Arc<dyn ExternalToolClient>) -> Arc<dyn ExternalToolClient>,
    ) -> Self {
        let api = Arc::new(api);
        let store = Arc::new(InMemorySnapshotStore::new());
        let attachments = Arc::new(InMemoryAttachmentRepository::new());
        let handler = Arc::new(
            FossologyProcessHandler::new(api.clone(), store.clone(), attachments.clone())
                .with_report_download(config.tool.report_download_enabled),
        );

        let client = wrap(handler.clone() as Arc<dyn ExternalToolClient>);
        let orchestrator =
            ProcessOrchestrator::from_config(&config, client, store.clone(), attachments.clone());

        Self {
            api,
            store,
            attachments,
            handler,
            orchestrator,
        }
    }

    /// Register a payload of `size_bytes` as the resource's source attachment
    pub fn add_payload(&self, resource_id: &str, size_bytes: usize) -> PayloadAttachment {
        let content: Vec<u8> = resource_id
            .bytes()
            .chain(std::iter::repeat(0u8))
            .take(size_bytes.max(resource_id.len()))
            .collect();
        self.attachments
            .add_source(resource_id, &format!("{resource_id}.tar.gz"), content)
    }

    /// Check status once a second until the resource is no longer Processing
    pub async fn wait_until_settled(&self, resource_id: &str) -> ProcessStatusReport {
        for _ in 0..MAX_STATUS_CHECKS {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let report = self
                .orchestrator
                .check_status(resource_id)
                .await
                .expect("status check");
            if report.verdict.is_settled() {
                return report;
            }
        }
        panic!("{resource_id} did not settle");
    }
}
