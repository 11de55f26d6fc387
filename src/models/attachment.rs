use serde::{Deserialize, Serialize};

use crate::constants::polling::BYTES_PER_MEGABYTE;

/// Source archive attached to a resource and sent to the scanning service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadAttachment {
    /// Content id in the attachment store
    pub content_id: String,
    pub filename: String,
    /// SHA-1 of the content, used to find earlier uploads of the same archive
    pub sha1: String,
    pub size_bytes: u64,
}

impl PayloadAttachment {
    /// Size in whole megabytes (MiB, rounded down)
    pub fn size_megabytes(&self) -> u64 {
        self.size_bytes / BYTES_PER_MEGABYTE
    }
}
