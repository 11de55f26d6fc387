//! # Persistence Collaborators
//!
//! Storage seams of the orchestrator:
//!
//! - [`snapshot_store`] - per-resource process snapshots with generation guard
//! - [`pg_snapshot_store`] - PostgreSQL implementation (feature `postgres`)
//! - [`attachment_repository`] - source payloads and stored reports
//!
//! ## Example Usage
//!
//! ```rust
//! use scan_orchestrator::database::{InMemorySnapshotStore, SnapshotStore};
//! use scan_orchestrator::models::ProcessSnapshot;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemorySnapshotStore::new();
//! store.save(&ProcessSnapshot::new("release-1", 1)).await?;
//!
//! // older generations are rejected
//! assert!(store.save(&ProcessSnapshot::new("release-1", 0)).await.is_err());
//! # Ok(())
//! # }
//! ```

pub mod attachment_repository;
#[cfg(feature = "postgres")]
pub mod pg_snapshot_store;
pub mod snapshot_store;

pub use attachment_repository::{
    sha1_hex, AttachmentError, AttachmentRepository, AttachmentResult,
    InMemoryAttachmentRepository, StoredReport,
};
#[cfg(feature = "postgres")]
pub use pg_snapshot_store::PgSnapshotStore;
pub use snapshot_store::{InMemorySnapshotStore, SharedSnapshotStore, SnapshotStore};
