//! # Registry Infrastructure
//!
//! Shared runtime registries of the orchestrator.
//!
//! ## Available Registries
//!
//! - **ResourceLockRegistry**: per-resource exclusive locks bounded by a global
//!   run capacity; the only mutable state shared between detached runs

pub mod resource_locks;

pub use resource_locks::{HeldLock, LockRejection, ResourceLease, ResourceLockRegistry};
