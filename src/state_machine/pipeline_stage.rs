//! # Pipeline Stages
//!
//! The orchestrator walks six stages; three of them are pure polling stages with
//! no step of their own in the snapshot. [`PipelineStage::resume_from`] derives
//! where a run has to pick up from the persisted snapshot alone, which is what
//! makes a repeated `run_process` resume instead of restart.

use super::{StepName, StepState};
use crate::models::ProcessSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// (Re)start the upload through the tool's trigger entry point
    Upload,
    /// Wait until the tool has unpacked the uploaded archive
    Unpack,
    /// Trigger the scan until the tool hands back a job id
    ScanTrigger,
    /// Wait for the scan job to settle
    ScanPoll,
    /// Trigger the report until the tool hands back a report id
    ReportTrigger,
    /// Wait until the report has been produced and stored
    ReportPoll,
    /// Nothing left to do
    Complete,
}

impl PipelineStage {
    /// Stage a run has to start at for the given snapshot
    ///
    /// `None` (no snapshot yet) and outdated snapshots start at Upload.
    pub fn resume_from(snapshot: Option<&ProcessSnapshot>) -> Self {
        let Some(snapshot) = snapshot else {
            return Self::Upload;
        };

        if snapshot.status.is_outdated() {
            return Self::Upload;
        }

        match snapshot.step(StepName::Upload) {
            Some(upload) if upload.status == StepState::Done && upload.is_triggered() => {}
            _ => return Self::Upload,
        }

        match snapshot.step(StepName::Scan) {
            None => return Self::Unpack,
            Some(scan) if !scan.is_triggered() => return Self::Unpack,
            Some(scan) if !scan.is_successful() => return Self::ScanPoll,
            Some(_) => {}
        }

        match snapshot.step(StepName::Report) {
            None => Self::ReportTrigger,
            Some(report) if !report.is_triggered() => Self::ReportTrigger,
            Some(report) if !report.is_successful() => Self::ReportPoll,
            Some(_) => Self::Complete,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Unpack => write!(f, "unpack"),
            Self::ScanTrigger => write!(f, "scan_trigger"),
            Self::ScanPoll => write!(f, "scan_poll"),
            Self::ReportTrigger => write!(f, "report_trigger"),
            Self::ReportPoll => write!(f, "report_poll"),
            Self::Complete => write!(f, "complete"),
        }
    }
}
