//! # Models
//!
//! Data exchanged between the orchestrator and its collaborators.

pub mod attachment;
pub mod process_snapshot;

pub use attachment::PayloadAttachment;
pub use process_snapshot::{from_wire, ProcessSnapshot, ProcessStep, StepOrderError};
