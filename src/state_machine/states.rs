use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a resource's scan process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Process created, nothing sent to the tool yet
    #[default]
    New,
    /// At least one step has been handed to the tool
    InWork,
    /// Report produced and stored
    Done,
    /// Invalidated; the next run restarts from Upload
    Outdated,
}

impl ProcessState {
    /// Check if the process has been invalidated
    pub fn is_outdated(&self) -> bool {
        matches!(self, Self::Outdated)
    }

    /// Check if this is a terminal state for the current generation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Outdated)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::InWork => write!(f, "in_work"),
            Self::Done => write!(f, "done"),
            Self::Outdated => write!(f, "outdated"),
        }
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_work" => Ok(Self::InWork),
            "done" => Ok(Self::Done),
            "outdated" => Ok(Self::Outdated),
            _ => Err(format!("Invalid process state: {s}")),
        }
    }
}

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Step created but not handed to the tool
    #[default]
    New,
    /// Tool is working on the step
    InWork,
    /// Tool finished the step (successfully or not, see the step result)
    Done,
}

impl StepState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::InWork)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::InWork => write!(f, "in_work"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_work" => Ok(Self::InWork),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid step state: {s}")),
        }
    }
}

/// Pipeline steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Upload,
    Scan,
    Report,
}

impl StepName {
    /// All steps in pipeline order
    pub const PIPELINE: [StepName; 3] = [Self::Upload, Self::Scan, Self::Report];

    /// Zero-based position of the step in the pipeline
    pub fn position(&self) -> usize {
        match self {
            Self::Upload => 0,
            Self::Scan => 1,
            Self::Report => 2,
        }
    }

    /// Step that follows this one, if any
    pub fn next(&self) -> Option<StepName> {
        Self::PIPELINE.get(self.position() + 1).copied()
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Scan => write!(f, "scan"),
            Self::Report => write!(f, "report"),
        }
    }
}

impl std::str::FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "scan" => Ok(Self::Scan),
            "report" => Ok(Self::Report),
            _ => Err(format!("Invalid step name: {s}")),
        }
    }
}
