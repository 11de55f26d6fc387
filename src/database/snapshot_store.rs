//! # Process Snapshot Store
//!
//! Persistence seam for per-resource process snapshots. Every implementation
//! refuses to overwrite a snapshot with one of an older generation, and refuses
//! to replace an Outdated snapshot with a live one of the same generation. A
//! handler call that loaded its snapshot before an invalidation therefore can
//! never undo it.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::models::ProcessSnapshot;

/// Loads and saves process snapshots keyed by resource id
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot, `None` before the first trigger
    async fn load(&self, resource_id: &str) -> StoreResult<Option<ProcessSnapshot>>;

    /// Persist a snapshot
    ///
    /// Fails with [`StoreError::StaleGeneration`] when the stored snapshot has a
    /// newer generation, and with [`StoreError::Superseded`] when the stored
    /// snapshot of the same generation is Outdated and the incoming one is not.
    async fn save(&self, snapshot: &ProcessSnapshot) -> StoreResult<()>;
}

/// Shared handle to a snapshot store
pub type SharedSnapshotStore = Arc<dyn SnapshotStore>;

/// In-process snapshot store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: DashMap<String, ProcessSnapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, resource_id: &str) -> StoreResult<Option<ProcessSnapshot>> {
        Ok(self
            .snapshots
            .get(resource_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, snapshot: &ProcessSnapshot) -> StoreResult<()> {
        match self.snapshots.entry(snapshot.resource_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get();
                if stored.generation > snapshot.generation {
                    return Err(StoreError::StaleGeneration {
                        resource_id: snapshot.resource_id.clone(),
                        attempted: snapshot.generation,
                        stored: stored.generation,
                    });
                }
                if stored.generation == snapshot.generation
                    && stored.status.is_outdated()
                    && !snapshot.status.is_outdated()
                {
                    return Err(StoreError::Superseded {
                        resource_id: snapshot.resource_id.clone(),
                        generation: snapshot.generation,
                    });
                }
                occupied.insert(snapshot.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(snapshot.clone());
            }
        }

        debug!(
            resource_id = %snapshot.resource_id,
            generation = snapshot.generation,
            status = %snapshot.status,
            "Snapshot saved"
        );
        Ok(())
    }
}
