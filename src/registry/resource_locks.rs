//! # Resource Lock Registry
//!
//! Bounded map from resource id to an exclusive lock. At most one run may hold
//! a resource at a time, and the number of simultaneously held locks never
//! exceeds the configured capacity. Acquisition is try-only: a full registry or
//! an already held resource is rejected immediately, never queued.
//!
//! ## Usage
//!
//! ```rust
//! use scan_orchestrator::registry::{LockRejection, ResourceLockRegistry};
//!
//! let registry = ResourceLockRegistry::new(10);
//!
//! let lease = registry.try_acquire("release-1").unwrap();
//! assert!(registry.is_locked("release-1"));
//! assert_eq!(
//!     registry.try_acquire("release-1").unwrap_err(),
//!     LockRejection::AlreadyHeld
//! );
//!
//! drop(lease);
//! assert!(!registry.is_locked("release-1"));
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a lock could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockRejection {
    /// The registry already holds its maximum number of locks
    #[error("lock registry is at capacity")]
    AtCapacity,
    /// Another run holds the lock for this resource
    #[error("resource is already locked")]
    AlreadyHeld,
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: u64,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LockState {
    held: HashMap<String, LockEntry>,
    next_token: u64,
}

/// Snapshot of a held lock, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub resource_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Registry of per-resource locks with a global capacity
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct ResourceLockRegistry {
    capacity: usize,
    state: Arc<Mutex<LockState>>,
}

impl fmt::Debug for ResourceLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ResourceLockRegistry");
        debug.field("capacity", &self.capacity);

        match self.state.try_lock() {
            Some(state) => {
                debug.field("held", &state.held.len());
            }
            None => {
                debug.field("held", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl ResourceLockRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Arc::new(Mutex::new(LockState::default())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Try to take the lock for `resource_id`
    ///
    /// Capacity is checked first, so a full registry reports `AtCapacity` even
    /// for a resource that is itself already locked.
    pub fn try_acquire(&self, resource_id: &str) -> Result<ResourceLease, LockRejection> {
        let mut state = self.state.lock();

        if state.held.len() >= self.capacity {
            warn!(
                resource_id = %resource_id,
                capacity = self.capacity,
                "Lock registry at capacity"
            );
            return Err(LockRejection::AtCapacity);
        }

        if state.held.contains_key(resource_id) {
            debug!(resource_id = %resource_id, "Resource already locked");
            return Err(LockRejection::AlreadyHeld);
        }

        state.next_token = state.next_token.wrapping_add(1);
        let token = state.next_token;
        let acquired_at = Utc::now();
        state.held.insert(
            resource_id.to_string(),
            LockEntry { token, acquired_at },
        );

        debug!(
            resource_id = %resource_id,
            held = state.held.len(),
            capacity = self.capacity,
            "Resource lock acquired"
        );

        Ok(ResourceLease {
            resource_id: resource_id.to_string(),
            token,
            acquired_at,
            state: Arc::clone(&self.state),
        })
    }

    /// Remove the lock for `resource_id` regardless of who holds it
    ///
    /// A lease still alive for the removed entry will not touch a newer holder
    /// when it is dropped.
    pub fn release(&self, resource_id: &str) -> bool {
        let removed = self.state.lock().held.remove(resource_id).is_some();
        if removed {
            debug!(resource_id = %resource_id, "Resource lock released");
        }
        removed
    }

    pub fn is_locked(&self, resource_id: &str) -> bool {
        self.state.lock().held.contains_key(resource_id)
    }

    /// Number of currently held locks
    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn held_locks(&self) -> Vec<HeldLock> {
        let state = self.state.lock();
        let mut locks: Vec<HeldLock> = state
            .held
            .iter()
            .map(|(resource_id, entry)| HeldLock {
                resource_id: resource_id.clone(),
                acquired_at: entry.acquired_at,
            })
            .collect();
        locks.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        locks
    }
}

/// Exclusive hold on one resource; released when dropped
#[must_use = "dropping the lease releases the resource lock immediately"]
pub struct ResourceLease {
    resource_id: String,
    token: u64,
    acquired_at: DateTime<Utc>,
    state: Arc<Mutex<LockState>>,
}

impl ResourceLease {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Release explicitly; same as dropping the lease
    pub fn release(self) {}
}

impl fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLease")
            .field("resource_id", &self.resource_id)
            .field("token", &self.token)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let owned = state
            .held
            .get(&self.resource_id)
            .is_some_and(|entry| entry.token == self.token);

        if owned {
            state.held.remove(&self.resource_id);
            debug!(resource_id = %self.resource_id, "Resource lease dropped, lock released");
        }
    }
}
