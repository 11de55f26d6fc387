//! # System Constants
//!
//! Constants that define the operational boundaries of the scan process
//! orchestrator: registry capacity, poll/retry bounds and the wire values
//! exchanged with the scanning service.

use std::time::Duration;

// Re-export state types for convenience
pub use crate::state_machine::{ProcessState, StepName, StepState};

/// Sentinel used by the scanning service and legacy snapshots for "no value yet"
pub const SENTINEL: &str = "-1";

/// Orchestration run limits
pub mod system {
    /// Maximum number of simultaneously held resource locks (and therefore runs)
    pub const MAX_CONCURRENT_RUNS: usize = 10;

    /// Number of steps a complete process carries
    pub const PIPELINE_STEP_COUNT: usize = 3;

    /// Crate version reported in logs
    pub const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Default poll/retry parameters for the four pipeline call sites
pub mod polling {
    use super::Duration;

    /// Attempt bound shared by every stage
    pub const MAX_ATTEMPTS: u32 = 15;

    /// Payloads up to this size poll at [`SMALL_PAYLOAD_INTERVAL`]
    pub const SMALL_PAYLOAD_THRESHOLD_BYTES: u64 = 5 * BYTES_PER_MEGABYTE;

    pub const SMALL_PAYLOAD_INTERVAL: Duration = Duration::from_secs(10);

    /// Larger payloads poll every `SECONDS_PER_MEGABYTE * size_mb` seconds
    pub const SECONDS_PER_MEGABYTE: u64 = 2;

    pub const TRIGGER_INTERVAL: Duration = Duration::from_secs(5);

    pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

    /// Upper bound for a scan ETA reported by the tool
    pub const MAX_ETA: Duration = Duration::from_secs(600);

    /// Lower bound for a scan ETA reported by the tool
    pub const MIN_ETA: Duration = Duration::from_secs(1);

    pub const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;
}

/// Job status values reported by the scanning service
pub mod job_status {
    pub const QUEUED: &str = "Queued";
    pub const PROCESSING: &str = "Processing";
    pub const COMPLETED: &str = "Completed";
    pub const FAILED: &str = "Failed";
}

/// Values used when talking to the FOSSology REST API
pub mod fossology {
    pub const REPORT_FORMAT_SPDX2: &str = "spdx2";
    pub const UPLOAD_TYPE_FILE: &str = "file";
    pub const UNKNOWN_FILENAME: &str = "unknown-filename";
    /// Result stored on a scan step whose job completed
    pub const SCAN_COMPLETED_RESULT: &str = "1";
}
