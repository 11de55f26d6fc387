//! # Orchestration Types
//!
//! Values returned by the orchestrator's public operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::ProcessSnapshot;

/// Answer to a trigger request
///
/// Capacity and per-resource rejections are regular outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A detached run was started
    Accepted { run_id: Uuid },
    /// A run for this resource is already in flight
    Busy,
    /// The registry is at capacity
    TooManyRequests,
}

impl TriggerOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Accepted { run_id } => Some(*run_id),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { run_id } => write!(f, "accepted ({run_id})"),
            Self::Busy => write!(f, "busy"),
            Self::TooManyRequests => write!(f, "too_many_requests"),
        }
    }
}

/// Status of a resource as seen by a status caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusVerdict {
    /// A run currently holds the resource's lock
    Processing,
    /// The latest snapshot is complete
    Success,
    Failure,
}

impl StatusVerdict {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for StatusVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatusReport {
    pub verdict: StatusVerdict,
    /// Latest persisted snapshot, absent before the first run
    pub snapshot: Option<ProcessSnapshot>,
}
