//! # Appflow
//!
//! Turns a free-text prompt into a live application by driving a remote
//! generation and publication service through seven stages.
//!
//! Appflow provides:
//!
//! - **Credential caching**: one shared bearer token, refreshed at most
//!   once at a time no matter how many callers ask
//! - **Stage polling**: cancellable waits for a remote phase, with progress
//!   reported on every attempt
//! - **Workflow orchestration**: the full create, generate, publish and
//!   locate sequence, or each step on its own keyed by session id
//! - **Tool facades**: stdio JSON-RPC and HTTP with Server-Sent Events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use appflow::prelude::*;
//!
//! let config = AppflowConfig::from_env()?;
//! let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
//!
//! let mut run = orchestrator.spawn_run("A todo list with due dates");
//! while let Some(event) = run.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod poller;
pub mod registry;
pub mod remote;
pub mod rpc;
pub mod testing;
pub mod utils;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{
        CommandCredentialProvider, Credential, CredentialCache, CredentialProvider, Principal,
        StaticTokenProvider,
    };
    pub use crate::cancellation::{CancelOnDrop, CancellationToken};
    pub use crate::config::{AppflowConfig, ConfigError, PollingConfig};
    pub use crate::errors::{AuthError, RemoteError, WorkflowError};
    pub use crate::events::{EventSink, LoggingEventSink};
    pub use crate::poller::StagePoller;
    pub use crate::registry::{SessionId, SessionRegistry};
    pub use crate::remote::{HttpRemoteApi, RemoteApi};
    pub use crate::rpc::{StdioServer, ToolCall, ToolExecutor};
    pub use crate::utils::{Clock, SystemClock, Timestamp};
    pub use crate::workflow::{
        Orchestrator, ProgressEvent, ProgressReporter, RunHandle, WorkflowStage,
    };
    pub use std::sync::Arc;
}
