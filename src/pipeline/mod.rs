//! Multi-agent clinical pipeline.
//!
//! Steps run strictly in [`PipelineStep`] order, filtered to the caller's
//! subset. Each step sees the state accumulated so far; the first failed step
//! ends the run.

mod orchestrator;
mod store;
mod types;

pub use orchestrator::{Orchestrator, OrchestratorError};
pub use store::{PipelineLease, PipelineStore, StoreError};
pub use types::{
    PipelineArtifacts, PipelineConfig, PipelineState, PipelineStatus, PipelineStep, StepFailure,
};
