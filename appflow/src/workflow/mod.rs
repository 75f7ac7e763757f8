//! The create-and-deploy workflow.
//!
//! This module provides:
//! - The seven stages and their phase vocabularies
//! - The forward-only run state machine
//! - The progress stream
//! - The orchestrator that drives runs

mod orchestrator;
mod progress;
mod stage;

pub use orchestrator::{compose_url, Orchestrator, RunHandle, SessionHandle};
pub use progress::{ProgressEvent, ProgressReporter};
pub use stage::{PhaseCriteria, PhaseObservation, WorkflowRun, WorkflowStage, WorkflowState};
