//! Lifecycle events for workflow runs.
//!
//! The orchestrator reports run lifecycle changes to an [`EventSink`].
//! These are for observability only; progress meant for the caller goes
//! through the run's progress stream instead.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink};

/// Event type names emitted by the orchestrator.
pub mod event_types {
    /// A create-and-deploy run started.
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    /// A stage finished successfully.
    pub const STAGE_COMPLETED: &str = "workflow.stage_completed";
    /// The run produced its URL.
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    /// The run failed or was cancelled.
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    /// A new session was registered.
    pub const SESSION_CREATED: &str = "session.created";
}
