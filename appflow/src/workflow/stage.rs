//! Workflow stages, run states and per-stage phase vocabularies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::Timestamp;

/// One of the seven fixed stages of a create-and-deploy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// Submit the prompt and obtain a remote job id.
    CreateJob,
    /// Wait for the job to become ready for generation.
    PollReady,
    /// Ask the remote system to build the application.
    TriggerBuild,
    /// Wait for the build to finish and yield an application key.
    PollBuilt,
    /// Start publishing the generated application.
    StartPublication,
    /// Wait for the publication to go live.
    PollPublished,
    /// Fetch the application's public location.
    ResolveLocation,
}

impl WorkflowStage {
    /// All stages in execution order.
    pub const ALL: [Self; 7] = [
        Self::CreateJob,
        Self::PollReady,
        Self::TriggerBuild,
        Self::PollBuilt,
        Self::StartPublication,
        Self::PollPublished,
        Self::ResolveLocation,
    ];

    /// Returns the 1-based position of the stage.
    #[must_use]
    pub fn number(self) -> usize {
        match self {
            Self::CreateJob => 1,
            Self::PollReady => 2,
            Self::TriggerBuild => 3,
            Self::PollBuilt => 4,
            Self::StartPublication => 5,
            Self::PollPublished => 6,
            Self::ResolveLocation => 7,
        }
    }

    /// Returns the snake_case name of the stage.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateJob => "create_job",
            Self::PollReady => "poll_ready",
            Self::TriggerBuild => "trigger_build",
            Self::PollBuilt => "poll_built",
            Self::StartPublication => "start_publication",
            Self::PollPublished => "poll_published",
            Self::ResolveLocation => "resolve_location",
        }
    }

    /// Progress line detail announcing the stage.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::CreateJob => "Creating generation job...",
            Self::PollReady => "Polling for 'ReadyToGenerate' status...",
            Self::TriggerBuild => "Triggering generation...",
            Self::PollBuilt => "Polling for generation completion status Done...",
            Self::StartPublication => "Starting application publication...",
            Self::PollPublished => "Polling for publication completion status Finished...",
            Self::ResolveLocation => "Retrieving final application URL...",
        }
    }

    /// Returns true for the stages that talk to the job (generation) API.
    #[must_use]
    pub fn is_generation(self) -> bool {
        matches!(
            self,
            Self::CreateJob | Self::PollReady | Self::TriggerBuild | Self::PollBuilt
        )
    }

    /// Formats the `Step n/7` header for this stage.
    #[must_use]
    pub fn header(self, detail: &str) -> String {
        format!("Step {}/{}: {detail}", self.number(), Self::ALL.len())
    }

    /// The header line emitted when the stage begins.
    #[must_use]
    pub fn announcement(self) -> String {
        self.header(self.title())
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal phases for one polling stage.
///
/// The job and publication APIs use different words for success and
/// failure, so each polling stage carries its own pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCriteria {
    /// The phase that ends the poll successfully.
    pub success: &'static str,
    /// The phase that ends the poll with a stage failure.
    pub failure: &'static str,
}

impl PhaseCriteria {
    /// Job is analysed and ready for generation.
    pub const JOB_READY: Self = Self {
        success: "ReadyToGenerate",
        failure: "Failed",
    };

    /// Job generation has produced an application.
    pub const JOB_BUILT: Self = Self {
        success: "Done",
        failure: "Failed",
    };

    /// Publication has gone live.
    pub const PUBLICATION: Self = Self {
        success: "Finished",
        failure: "FinishedWithError",
    };

    /// Returns true if `phase` is the success phase.
    #[must_use]
    pub fn is_success(&self, phase: &str) -> bool {
        phase == self.success
    }

    /// Returns true if `phase` is the failure phase.
    #[must_use]
    pub fn is_failure(&self, phase: &str) -> bool {
        phase == self.failure
    }
}

/// Where a run currently stands.
///
/// Transitions only move forward; `Error` is reachable from every
/// non-idle state and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// The remote job exists.
    JobCreated,
    /// The job reported `ReadyToGenerate`.
    ReadyToGenerate,
    /// Generation has been triggered.
    GenerationTriggered,
    /// The job reported `Done` with an application key.
    Generated,
    /// A publication id was obtained.
    PublicationStarted,
    /// The publication reported `Finished`.
    Published,
    /// The final URL is known.
    LocationResolved,
    /// The run failed.
    Error,
}

impl WorkflowState {
    /// Returns the state reached when `stage` completes from this state.
    ///
    /// Returns `None` if `stage` is not the next stage for this state.
    #[must_use]
    pub fn after(self, stage: WorkflowStage) -> Option<Self> {
        match (self, stage) {
            (Self::Idle, WorkflowStage::CreateJob) => Some(Self::JobCreated),
            (Self::JobCreated, WorkflowStage::PollReady) => Some(Self::ReadyToGenerate),
            (Self::ReadyToGenerate, WorkflowStage::TriggerBuild) => {
                Some(Self::GenerationTriggered)
            }
            (Self::GenerationTriggered, WorkflowStage::PollBuilt) => Some(Self::Generated),
            (Self::Generated, WorkflowStage::StartPublication) => Some(Self::PublicationStarted),
            (Self::PublicationStarted, WorkflowStage::PollPublished) => Some(Self::Published),
            (Self::Published, WorkflowStage::ResolveLocation) => Some(Self::LocationResolved),
            _ => None,
        }
    }

    /// Returns true for `LocationResolved` and `Error`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LocationResolved | Self::Error)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::JobCreated => "job_created",
            Self::ReadyToGenerate => "ready_to_generate",
            Self::GenerationTriggered => "generation_triggered",
            Self::Generated => "generated",
            Self::PublicationStarted => "publication_started",
            Self::Published => "published",
            Self::LocationResolved => "location_resolved",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A phase observed by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseObservation {
    /// The stage that observed the phase.
    pub stage: WorkflowStage,
    /// The reported phase.
    pub phase: String,
    /// When it was observed.
    pub observed_at: Timestamp,
}

/// The record of one create-and-deploy run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRun {
    state: WorkflowState,
    observations: Vec<PhaseObservation>,
    failed_stage: Option<WorkflowStage>,
    url: Option<String>,
}

impl WorkflowRun {
    /// Creates a run in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Marks `stage` complete.
    ///
    /// Returns false, leaving the state untouched, if `stage` is out of order.
    pub fn complete(&mut self, stage: WorkflowStage) -> bool {
        match self.state.after(stage) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// Records an observed phase.
    pub fn observe(&mut self, stage: WorkflowStage, phase: impl Into<String>, at: Timestamp) {
        self.observations.push(PhaseObservation {
            stage,
            phase: phase.into(),
            observed_at: at,
        });
    }

    /// Moves the run to `Error`, remembering the stage that failed.
    pub fn fail(&mut self, stage: WorkflowStage) {
        if self.state != WorkflowState::Idle && !self.state.is_terminal() {
            self.state = WorkflowState::Error;
        }
        self.failed_stage = Some(stage);
    }

    /// Records the resolved URL.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    /// Returns all phases observed so far, in order.
    #[must_use]
    pub fn observations(&self) -> &[PhaseObservation] {
        &self.observations
    }

    /// Returns just the phase strings, in order.
    #[must_use]
    pub fn phases(&self) -> Vec<&str> {
        self.observations.iter().map(|o| o.phase.as_str()).collect()
    }

    /// Returns the stage that failed, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<WorkflowStage> {
        self.failed_stage
    }

    /// Returns the resolved URL, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_stage_numbers_follow_order() {
        for (idx, stage) in WorkflowStage::ALL.iter().enumerate() {
            assert_eq!(stage.number(), idx + 1);
        }
        assert_eq!(
            WorkflowStage::PollBuilt.header("Polling..."),
            "Step 4/7: Polling..."
        );
        assert_eq!(
            WorkflowStage::CreateJob.announcement(),
            "Step 1/7: Creating generation job..."
        );
    }

    #[test]
    fn test_full_forward_path() {
        let mut run = WorkflowRun::new();
        for stage in WorkflowStage::ALL {
            assert!(run.complete(stage), "stage {stage} rejected");
        }
        assert_eq!(run.state(), WorkflowState::LocationResolved);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_out_of_order_stage_rejected() {
        let mut run = WorkflowRun::new();
        assert!(!run.complete(WorkflowStage::TriggerBuild));
        assert_eq!(run.state(), WorkflowState::Idle);

        assert!(run.complete(WorkflowStage::CreateJob));
        assert!(!run.complete(WorkflowStage::CreateJob));
        assert_eq!(run.state(), WorkflowState::JobCreated);
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut run = WorkflowRun::new();
        run.complete(WorkflowStage::CreateJob);
        run.fail(WorkflowStage::PollReady);

        assert_eq!(run.state(), WorkflowState::Error);
        assert_eq!(run.failed_stage(), Some(WorkflowStage::PollReady));
        assert!(!run.complete(WorkflowStage::PollReady));
    }

    #[test]
    fn test_phase_vocabularies_are_distinct() {
        assert!(PhaseCriteria::JOB_BUILT.is_failure("Failed"));
        assert!(!PhaseCriteria::PUBLICATION.is_failure("Failed"));
        assert!(PhaseCriteria::PUBLICATION.is_failure("FinishedWithError"));
        assert!(!PhaseCriteria::JOB_READY.is_success("Done"));
    }

    #[test]
    fn test_observations_keep_order() {
        let mut run = WorkflowRun::new();
        let now = Utc::now();
        run.observe(WorkflowStage::PollReady, "Queued", now);
        run.observe(WorkflowStage::PollReady, "ReadyToGenerate", now);
        assert_eq!(run.phases(), vec!["Queued", "ReadyToGenerate"]);
    }
}
