//! The remote job and publication APIs.
//!
//! [`RemoteApi`] is the seam the orchestrator talks through;
//! [`HttpRemoteApi`] is the production implementation over `reqwest`.

mod api;
mod http;
mod models;

pub use api::RemoteApi;
#[cfg(test)]
pub use api::MockRemoteApi;
pub use http::{HttpRemoteApi, BODY_SNIPPET_LIMIT};
pub use models::{
    AppSpec, ApplicationDetails, CreateJobRequest, CreatePublicationRequest, CreatedJob,
    JobStatus, PublicationCreated, PublicationStatus,
};
