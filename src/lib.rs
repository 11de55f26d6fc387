#![allow(clippy::doc_markdown)] // Allow technical terms like FOSSology, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Scan Orchestrator
//!
//! Drives license/copyright scans of release source archives through a slow,
//! poll-only scanning service (FOSSology).
//!
//! ## Overview
//!
//! A scan of one resource is a pipeline of tool-side jobs: upload the source
//! archive, wait for it to be unpacked, run the scan, generate and fetch the
//! SPDX report. Each job takes minutes to hours and the tool only offers
//! "trigger" and "ask for status" calls. The orchestrator sequences those calls
//! in detached background runs, persists the progress after every step and
//! makes repeated triggers resume instead of restart.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - trigger/status API and the detached pipeline worker
//! - [`registry`] - bounded per-resource lock registry
//! - [`resilience`] - the poll/retry primitive shared by every stage
//! - [`client`] - external tool seam, FOSSology REST client and process handler
//! - [`database`] - snapshot store and attachment repository collaborators
//! - [`models`] - process snapshot and attachment data model
//! - [`state_machine`] - process/step states and pipeline stages
//! - [`config`] - YAML + environment configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan_orchestrator::client::{FossologyProcessHandler, FossologyRestClient};
//! use scan_orchestrator::config::ConfigManager;
//! use scan_orchestrator::database::{InMemoryAttachmentRepository, InMemorySnapshotStore};
//! use scan_orchestrator::orchestration::ProcessOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let store = Arc::new(InMemorySnapshotStore::new());
//! let attachments = Arc::new(InMemoryAttachmentRepository::new());
//! attachments.add_source("release-1", "sources.tar.gz", std::fs::read("sources.tar.gz")?);
//!
//! let api = Arc::new(FossologyRestClient::new(config.tool.clone())?);
//! let handler = Arc::new(FossologyProcessHandler::new(api, store.clone(), attachments.clone()));
//! let orchestrator = ProcessOrchestrator::from_config(config, handler, store, attachments);
//!
//! let outcome = orchestrator.run_process("release-1", false, None).await?;
//! println!("trigger: {outcome}");
//!
//! let report = orchestrator.check_status("release-1").await?;
//! println!("status: {}", report.verdict);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod state_machine;

pub use client::{ExternalToolClient, RequestStatus};
pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestrationError, Result, StageFailure, StoreError, ToolError};
pub use models::{PayloadAttachment, ProcessSnapshot, ProcessStep};
pub use orchestration::{ProcessOrchestrator, ProcessStatusReport, StatusVerdict, TriggerOutcome};
pub use registry::{ResourceLease, ResourceLockRegistry};
pub use state_machine::{PipelineStage, ProcessState, StepName, StepState};
