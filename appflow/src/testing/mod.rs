//! Test doubles for the orchestration core.
//!
//! This module provides:
//! - A manual clock for deterministic expiry checks
//! - A counting credential provider
//! - Unsigned JWT builders
//! - A scripted remote API with a call log

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::auth::{CredentialProvider, Principal};
use crate::errors::{AuthError, RemoteError};
use crate::remote::{
    ApplicationDetails, CreatedJob, JobStatus, PublicationCreated, PublicationStatus, RemoteApi,
};
use crate::utils::{Clock, Timestamp};

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// A credential provider that counts its calls.
#[derive(Debug)]
pub struct CountingProvider {
    outcome: Result<String, AuthError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingProvider {
    /// Always returns `token`.
    #[must_use]
    pub fn succeeding(token: impl Into<String>) -> Self {
        Self {
            outcome: Ok(token.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with `reason`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(AuthError::provider(reason)),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many times the provider has been called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn authenticate(&self, _principal: &Principal) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// Builds an unsigned JWT carrying `payload`.
#[must_use]
pub fn jwt_with_payload(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}

/// Builds an unsigned JWT that expires at `expires_at`.
#[must_use]
pub fn jwt_with_expiry(expires_at: Timestamp) -> String {
    jwt_with_payload(&serde_json::json!({
        "sub": "appflow-test",
        "exp": expires_at.timestamp(),
    }))
}

/// One call made against a [`ScriptedRemoteApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Remote operation name, as used in error messages.
    pub operation: &'static str,
    /// The id or prompt the call was made with.
    pub argument: String,
    /// The bearer token sent.
    pub token: String,
}

/// A [`RemoteApi`] that replays queued responses.
///
/// Each endpoint has its own queue. An exhausted queue answers with a
/// request error, except trigger-generation which defaults to success.
#[derive(Debug, Default)]
pub struct ScriptedRemoteApi {
    created_jobs: Mutex<VecDeque<Result<CreatedJob, RemoteError>>>,
    job_statuses: Mutex<VecDeque<Result<JobStatus, RemoteError>>>,
    triggers: Mutex<VecDeque<Result<(), RemoteError>>>,
    publications: Mutex<VecDeque<Result<PublicationCreated, RemoteError>>>,
    publication_statuses: Mutex<VecDeque<Result<PublicationStatus, RemoteError>>>,
    application_details: Mutex<VecDeque<Result<ApplicationDetails, RemoteError>>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl ScriptedRemoteApi {
    /// Creates an API with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a full successful run.
    ///
    /// Job `job-1` goes `Queued, Queued, ReadyToGenerate`, then
    /// `Processing, Done` with application `app-1`; publication `pub-1`
    /// starts `Started`, then goes `Running, Finished`; the application lives
    /// at `/app1`.
    #[must_use]
    pub fn happy_path() -> Self {
        Self::new()
            .with_job("job-1")
            .with_job_phases(&["Queued", "Queued", "ReadyToGenerate", "Processing"])
            .with_job_status(JobStatus::new("Done").with_application_key("app-1"))
            .with_publication("pub-1")
            .with_publication_phases(&["Running", "Finished"])
            .with_url_path("/app1")
    }

    /// Answers create-job with `key`.
    #[must_use]
    pub fn with_job(self, key: &str) -> Self {
        self.with_created_job(Ok(CreatedJob {
            key: Some(key.to_string()),
            status: Some("Queued".to_string()),
        }))
    }

    /// Queues a create-job response.
    #[must_use]
    pub fn with_created_job(self, response: Result<CreatedJob, RemoteError>) -> Self {
        self.created_jobs.lock().push_back(response);
        self
    }

    /// Queues job statuses with the given phases.
    #[must_use]
    pub fn with_job_phases(self, phases: &[&str]) -> Self {
        self.job_statuses
            .lock()
            .extend(phases.iter().map(|phase| Ok(JobStatus::new(*phase))));
        self
    }

    /// Queues one job status.
    #[must_use]
    pub fn with_job_status(self, status: JobStatus) -> Self {
        self.job_statuses.lock().push_back(Ok(status));
        self
    }

    /// Queues a job-status failure.
    #[must_use]
    pub fn with_job_status_error(self, error: RemoteError) -> Self {
        self.job_statuses.lock().push_back(Err(error));
        self
    }

    /// Queues a trigger-generation response.
    #[must_use]
    pub fn with_trigger(self, response: Result<(), RemoteError>) -> Self {
        self.triggers.lock().push_back(response);
        self
    }

    /// Answers create-publication with `key`.
    #[must_use]
    pub fn with_publication(self, key: &str) -> Self {
        self.with_created_publication(Ok(PublicationCreated {
            key: Some(key.to_string()),
            status: Some("Started".to_string()),
        }))
    }

    /// Queues a create-publication response.
    #[must_use]
    pub fn with_created_publication(
        self,
        response: Result<PublicationCreated, RemoteError>,
    ) -> Self {
        self.publications.lock().push_back(response);
        self
    }

    /// Queues publication statuses with the given phases.
    #[must_use]
    pub fn with_publication_phases(self, phases: &[&str]) -> Self {
        self.publication_statuses
            .lock()
            .extend(phases.iter().map(|phase| Ok(PublicationStatus::new(*phase))));
        self
    }

    /// Answers application-details with `url_path`.
    #[must_use]
    pub fn with_url_path(self, url_path: &str) -> Self {
        self.with_application_details(Ok(ApplicationDetails {
            url_path: Some(url_path.to_string()),
        }))
    }

    /// Queues an application-details response.
    #[must_use]
    pub fn with_application_details(
        self,
        response: Result<ApplicationDetails, RemoteError>,
    ) -> Self {
        self.application_details.lock().push_back(response);
        self
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the operation names called so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|c| c.operation).collect()
    }

    /// Returns how many times `operation` was called.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn record(&self, operation: &'static str, token: &str, argument: &str) {
        self.calls.lock().push(RemoteCall {
            operation,
            argument: argument.to_string(),
            token: token.to_string(),
        });
    }
}

fn next<T>(
    queue: &Mutex<VecDeque<Result<T, RemoteError>>>,
    operation: &str,
) -> Result<T, RemoteError> {
    queue
        .lock()
        .pop_front()
        .unwrap_or_else(|| Err(RemoteError::request(operation, "no scripted response")))
}

#[async_trait]
impl RemoteApi for ScriptedRemoteApi {
    async fn create_job(&self, token: &str, prompt: &str) -> Result<CreatedJob, RemoteError> {
        self.record("startGenerationJob", token, prompt);
        next(&self.created_jobs, "startGenerationJob")
    }

    async fn job_status(&self, token: &str, job_id: &str) -> Result<JobStatus, RemoteError> {
        self.record("getJobStatus", token, job_id);
        next(&self.job_statuses, "getJobStatus")
    }

    async fn trigger_generation(&self, token: &str, job_id: &str) -> Result<(), RemoteError> {
        self.record("triggerGeneration", token, job_id);
        self.triggers.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn create_publication(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<PublicationCreated, RemoteError> {
        self.record("startPublication", token, application_key);
        next(&self.publications, "startPublication")
    }

    async fn publication_status(
        &self,
        token: &str,
        publication_id: &str,
    ) -> Result<PublicationStatus, RemoteError> {
        self.record("getPublicationStatus", token, publication_id);
        next(&self.publication_statuses, "getPublicationStatus")
    }

    async fn application_details(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<ApplicationDetails, RemoteError> {
        self.record("getApplicationDetails", token, application_key);
        next(&self.application_details, "getApplicationDetails")
    }
}
