// State machine module for the scan process
//
// Process/step states as persisted in snapshots, and the pipeline stages the
// orchestrator derives from them.

pub mod pipeline_stage;
pub mod states;

// Re-export main types for convenient access
pub use pipeline_stage::PipelineStage;
pub use states::{ProcessState, StepName, StepState};
