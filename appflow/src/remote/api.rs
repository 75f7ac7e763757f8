//! The remote API seam.

use async_trait::async_trait;

use super::models::{
    ApplicationDetails, CreatedJob, JobStatus, PublicationCreated, PublicationStatus,
};
use crate::errors::RemoteError;

/// Calls against the remote job and publication APIs.
///
/// Every call takes the bearer token to send; implementations never
/// cache or refresh credentials themselves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Submits a generation job for `prompt`.
    async fn create_job(&self, token: &str, prompt: &str) -> Result<CreatedJob, RemoteError>;

    /// Fetches the status of a job.
    async fn job_status(&self, token: &str, job_id: &str) -> Result<JobStatus, RemoteError>;

    /// Asks the remote system to generate the job's application.
    async fn trigger_generation(&self, token: &str, job_id: &str) -> Result<(), RemoteError>;

    /// Starts publishing an application.
    async fn create_publication(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<PublicationCreated, RemoteError>;

    /// Fetches the status of a publication.
    async fn publication_status(
        &self,
        token: &str,
        publication_id: &str,
    ) -> Result<PublicationStatus, RemoteError>;

    /// Fetches an application's details.
    async fn application_details(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<ApplicationDetails, RemoteError>;
}
