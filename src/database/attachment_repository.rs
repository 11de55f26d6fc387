//! # Attachment Repository
//!
//! Source archives of a resource and the reports produced for it live in an
//! attachment store outside the orchestrator. The repository trait is the only
//! view the orchestrator and the process handler get of it.

use async_trait::async_trait;
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::PayloadAttachment;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment content not found: {0}")]
    ContentNotFound(String),

    #[error("Attachment I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Attachment storage error: {0}")]
    Storage(String),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// A report stored for a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub content_id: String,
    pub resource_id: String,
    pub filename: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    /// Attachments designated as the resource's source payload
    async fn source_attachments(&self, resource_id: &str) -> AttachmentResult<Vec<PayloadAttachment>>;

    async fn read_content(&self, content_id: &str) -> AttachmentResult<Vec<u8>>;

    /// Store a produced report and return its content id
    async fn store_report(
        &self,
        resource_id: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> AttachmentResult<String>;
}

/// Hex encoded SHA-1 of `content`
pub fn sha1_hex(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Attachment store kept in memory, used by the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryAttachmentRepository {
    sources: DashMap<String, Vec<PayloadAttachment>>,
    contents: DashMap<String, Vec<u8>>,
    reports: DashMap<String, Vec<StoredReport>>,
}

impl InMemoryAttachmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `content` as a source attachment of `resource_id`
    pub fn add_source(
        &self,
        resource_id: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> PayloadAttachment {
        let attachment = PayloadAttachment {
            content_id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            sha1: sha1_hex(&content),
            size_bytes: content.len() as u64,
        };

        self.contents.insert(attachment.content_id.clone(), content);
        self.sources
            .entry(resource_id.to_string())
            .or_default()
            .push(attachment.clone());

        debug!(
            resource_id = %resource_id,
            content_id = %attachment.content_id,
            size_bytes = attachment.size_bytes,
            "Source attachment registered"
        );
        attachment
    }

    /// Register a local file as a source attachment of `resource_id`
    pub async fn add_source_file(
        &self,
        resource_id: &str,
        path: &Path,
    ) -> AttachmentResult<PayloadAttachment> {
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::constants::fossology::UNKNOWN_FILENAME.to_string());
        Ok(self.add_source(resource_id, &filename, content))
    }

    /// Drop every source attachment of `resource_id`
    pub fn clear_sources(&self, resource_id: &str) {
        if let Some((_, attachments)) = self.sources.remove(resource_id) {
            for attachment in attachments {
                self.contents.remove(&attachment.content_id);
            }
        }
    }

    pub fn reports(&self, resource_id: &str) -> Vec<StoredReport> {
        self.reports
            .get(resource_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AttachmentRepository for InMemoryAttachmentRepository {
    async fn source_attachments(&self, resource_id: &str) -> AttachmentResult<Vec<PayloadAttachment>> {
        Ok(self
            .sources
            .get(resource_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn read_content(&self, content_id: &str) -> AttachmentResult<Vec<u8>> {
        self.contents
            .get(content_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AttachmentError::ContentNotFound(content_id.to_string()))
    }

    async fn store_report(
        &self,
        resource_id: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> AttachmentResult<String> {
        let content_id = Uuid::new_v4().to_string();
        let report = StoredReport {
            content_id: content_id.clone(),
            resource_id: resource_id.to_string(),
            filename: filename.to_string(),
            size_bytes: content.len() as u64,
        };

        self.contents.insert(content_id.clone(), content);
        self.reports
            .entry(resource_id.to_string())
            .or_default()
            .push(report);

        debug!(resource_id = %resource_id, content_id = %content_id, "Report stored");
        Ok(content_id)
    }
}
