//! # Process Snapshot Model
//!
//! Persisted state of one resource's scan process: overall status plus the
//! ordered Upload → Scan → Report steps with their tool correlation ids and
//! results.
//!
//! The scanning service and older snapshots use the string `"-1"` for "no value
//! yet". That sentinel never leaves this module: correlation ids and results are
//! `Option<String>`, and [`from_wire`] / the serde helpers normalize incoming
//! values.

use crate::constants::{system, SENTINEL};
use crate::state_machine::{ProcessState, StepName, StepState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Normalize a wire value: the sentinel, empty and blank strings mean "absent"
pub fn from_wire(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == SENTINEL {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn deserialize_wire_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(from_wire))
}

/// Errors raised when mutating the step list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepOrderError {
    #[error("Step {attempted} cannot follow {furthest}")]
    OutOfOrder {
        attempted: StepName,
        furthest: StepName,
    },
    #[error("Step {attempted} must be preceded by {expected}")]
    MissingPredecessor {
        attempted: StepName,
        expected: StepName,
    },
    #[error("Step {attempted} cannot be appended to {count} steps")]
    Overfull { attempted: StepName, count: usize },
}

/// One stage of the tool pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: StepName,
    #[serde(default)]
    pub status: StepState,
    /// Id of the upload/job/report inside the tool
    #[serde(default, deserialize_with = "deserialize_wire_value")]
    pub correlation_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_wire_value")]
    pub result: Option<String>,
    #[serde(default)]
    pub started_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_on: Option<DateTime<Utc>>,
}

impl ProcessStep {
    /// Create a fresh step in `New`
    pub fn new(name: StepName) -> Self {
        Self {
            name,
            status: StepState::New,
            correlation_id: None,
            result: None,
            started_on: Some(Utc::now()),
            finished_on: None,
        }
    }

    /// The tool accepted the step and handed back an id
    pub fn is_triggered(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Correlation id and result present and status Done
    pub fn is_successful(&self) -> bool {
        self.status.is_done() && self.correlation_id.is_some() && self.result.is_some()
    }

    pub fn set_correlation_id(&mut self, wire_value: &str) {
        self.correlation_id = from_wire(wire_value);
    }

    pub fn set_result(&mut self, wire_value: &str) {
        self.result = from_wire(wire_value);
    }

    /// Mark the step Done and stamp the finish time
    pub fn finish(&mut self) {
        self.status = StepState::Done;
        self.finished_on = Some(Utc::now());
    }
}

/// Per-resource process state as persisted by the snapshot store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub resource_id: String,
    /// Incremented whenever an outdated process is restarted
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub status: ProcessState,
    /// Content id of the payload the process was started for
    #[serde(default)]
    pub attachment_id: Option<String>,
    /// SHA-1 of that payload
    #[serde(default)]
    pub attachment_hash: Option<String>,
    #[serde(default)]
    pub steps: Vec<ProcessStep>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessSnapshot {
    pub fn new(resource_id: impl Into<String>, generation: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            generation,
            status: ProcessState::New,
            attachment_id: None,
            attachment_hash: None,
            steps: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn step(&self, name: StepName) -> Option<&ProcessStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn step_mut(&mut self, name: StepName) -> Option<&mut ProcessStep> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    /// Last step present in the pipeline
    pub fn furthest_step(&self) -> Option<&ProcessStep> {
        self.steps.last()
    }

    /// Append a step, keeping pipeline order
    ///
    /// Appending a step that already exists is a no-op.
    pub fn push_step(&mut self, step: ProcessStep) -> Result<(), StepOrderError> {
        if self.step(step.name).is_some() {
            return Ok(());
        }

        match self.furthest_step() {
            Some(furthest) if furthest.name > step.name => {
                return Err(StepOrderError::OutOfOrder {
                    attempted: step.name,
                    furthest: furthest.name,
                });
            }
            _ => {}
        }

        let expected_position = self.steps.len();
        if step.name.position() != expected_position {
            let Some(&expected) = StepName::PIPELINE.get(expected_position) else {
                return Err(StepOrderError::Overfull {
                    attempted: step.name,
                    count: expected_position,
                });
            };
            return Err(StepOrderError::MissingPredecessor {
                attempted: step.name,
                expected,
            });
        }

        self.steps.push(step);
        Ok(())
    }

    /// Sort steps into pipeline order and drop duplicates
    pub fn ensure_step_order(&mut self) {
        self.steps.sort_by_key(|step| step.name);
        self.steps.dedup_by_key(|step| step.name);
    }

    /// Exactly Upload, Scan and Report, each successful
    pub fn is_complete(&self) -> bool {
        self.steps.len() == system::PIPELINE_STEP_COUNT
            && self
                .steps
                .iter()
                .zip(StepName::PIPELINE.iter())
                .all(|(step, expected)| step.name == *expected && step.is_successful())
    }

    /// Stamp the modification time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
