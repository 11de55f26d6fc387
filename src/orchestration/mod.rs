//! # Orchestration Engine
//!
//! Sequencing of one resource's scan process through the external tool.
//!
//! ## Core Components
//!
//! - **ProcessOrchestrator**: synchronous trigger/status API, spawns one detached
//!   worker per accepted run
//! - **PipelineRun**: the worker; walks the pipeline stages from the resume point
//!   derived from the persisted snapshot
//!
//! ## Run lifecycle
//!
//! ```text
//! run_process ──► attachment count ──► check_connection ──► try_acquire ──► spawn
//!                     │                     │                    │
//!               AttachmentCount   ExternalServiceUnavailable   Busy / TooManyRequests
//!
//! worker: [invalidate] ─► Upload ─► Unpack ─► ScanTrigger ─► ScanPoll
//!                                        ─► ReportTrigger ─► ReportPoll ─► Complete
//! ```
//!
//! The lease taken in `run_process` moves into the worker and is released when
//! the worker ends, whatever the outcome.

pub mod orchestrator;
mod pipeline;
pub mod types;

pub use orchestrator::ProcessOrchestrator;
pub use types::{ProcessStatusReport, StatusVerdict, TriggerOutcome};
