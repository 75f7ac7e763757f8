//! `reqwest` implementation of [`RemoteApi`].

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::api::RemoteApi;
use super::models::{
    ApplicationDetails, CreateJobRequest, CreatePublicationRequest, CreatedJob, JobStatus,
    PublicationCreated, PublicationStatus,
};
use crate::config::HttpConfig;
use crate::errors::RemoteError;

/// Maximum number of characters of an error body kept in a [`RemoteError`].
pub const BODY_SNIPPET_LIMIT: usize = 500;

const JOBS_PATH: &str = "/api/app-generation/v1alpha3/jobs";
const PUBLICATIONS_PATH: &str = "/api/v1/publications";
const APPLICATIONS_PATH: &str = "/api/v1/applications";

/// Talks to the remote APIs over HTTPS.
///
/// Every request has the configured timeout and carries
/// `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRemoteApi {
    /// Creates a client rooted at `base_url` (scheme and host, no path).
    pub fn new(base_url: impl Into<String>, config: &HttpConfig) -> Result<Self, RemoteError> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| RemoteError::request("buildClient", e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Creates a client for `https://<hostname>`.
    pub fn for_hostname(hostname: &str, config: &HttpConfig) -> Result<Self, RemoteError> {
        Self::new(format!("https://{hostname}"), config)
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Builds the URL for `path` followed by `segments`, each percent-encoded
    /// as a single path segment.
    fn endpoint(
        &self,
        operation: &str,
        path: &str,
        segments: &[&str],
    ) -> Result<reqwest::Url, RemoteError> {
        let mut url = reqwest::Url::parse(&self.url(path))
            .map_err(|e| RemoteError::request(operation, format!("invalid URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::request(operation, "base URL cannot carry a path"))?
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(operation, &e))?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "Remote call returned");
        if status.is_success() {
            return Ok(response);
        }

        // The body is only diagnostic here; an unreadable one is reported empty.
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::status(
            operation,
            status.as_u16(),
            body_snippet(&body),
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = self.send(operation, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, &e))?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::decode(operation, e.to_string()))
    }

    fn transport_error(&self, operation: &str, err: &reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                operation: operation.to_string(),
                timeout_seconds: self.timeout.as_secs_f64(),
            }
        } else {
            RemoteError::request(operation, err.to_string())
        }
    }

    fn get(&self, url: reqwest::Url, token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }

    fn post(&self, url: reqwest::Url, token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }
}

/// Truncates a response body to [`BODY_SNIPPET_LIMIT`] characters.
fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_job(&self, token: &str, prompt: &str) -> Result<CreatedJob, RemoteError> {
        let operation = "startGenerationJob";
        let request = self
            .post(self.endpoint(operation, JOBS_PATH, &[])?, token)
            .header(CONTENT_TYPE, "application/json")
            .json(&CreateJobRequest::new(prompt));
        self.send_json(operation, request).await
    }

    async fn job_status(&self, token: &str, job_id: &str) -> Result<JobStatus, RemoteError> {
        let operation = "getJobStatus";
        let request = self.get(self.endpoint(operation, JOBS_PATH, &[job_id])?, token);
        self.send_json(operation, request).await
    }

    async fn trigger_generation(&self, token: &str, job_id: &str) -> Result<(), RemoteError> {
        let operation = "triggerGeneration";
        let url = self.endpoint(operation, JOBS_PATH, &[job_id, "generation"])?;
        self.send(operation, self.post(url, token)).await.map(|_| ())
    }

    async fn create_publication(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<PublicationCreated, RemoteError> {
        let operation = "startPublication";
        let request = self
            .post(self.endpoint(operation, PUBLICATIONS_PATH, &[])?, token)
            .header(CONTENT_TYPE, "application/json")
            .json(&CreatePublicationRequest::new(application_key));
        self.send_json(operation, request).await
    }

    async fn publication_status(
        &self,
        token: &str,
        publication_id: &str,
    ) -> Result<PublicationStatus, RemoteError> {
        let operation = "getPublicationStatus";
        let url = self.endpoint(operation, PUBLICATIONS_PATH, &[publication_id])?;
        self.send_json(operation, self.get(url, token)).await
    }

    async fn application_details(
        &self,
        token: &str,
        application_key: &str,
    ) -> Result<ApplicationDetails, RemoteError> {
        let operation = "getApplicationDetails";
        let url = self.endpoint(operation, APPLICATIONS_PATH, &[application_key])?;
        self.send_json(operation, self.get(url, token)).await
    }
}
