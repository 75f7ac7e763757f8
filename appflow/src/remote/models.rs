//! Request and response bodies.
//!
//! Only the fields the workflow inspects are modelled; anything else in a
//! response is ignored.

use serde::{Deserialize, Serialize};

use crate::poller::PhaseReport;

/// Body of the create-job call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// Free-text description of the application.
    pub prompt: String,
    /// Attached files; always empty.
    pub files: Vec<serde_json::Value>,
    /// Run the job outside the tenant context.
    pub ignore_tenant_context: bool,
}

impl CreateJobRequest {
    /// Creates a request for `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            files: Vec::new(),
            ignore_tenant_context: true,
        }
    }
}

/// Response of the create-job call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedJob {
    /// The new job's id.
    #[serde(default)]
    pub key: Option<String>,
    /// The job's initial phase.
    #[serde(default)]
    pub status: Option<String>,
}

/// The generated application section of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Key of the generated application.
    #[serde(default)]
    pub app_key: Option<String>,
}

/// Response of the job-status call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current phase.
    #[serde(default)]
    pub status: String,
    /// Present once the job has produced an application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_spec: Option<AppSpec>,
}

impl JobStatus {
    /// Creates a status with just a phase.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            app_spec: None,
        }
    }

    /// Attaches an application key.
    #[must_use]
    pub fn with_application_key(mut self, key: impl Into<String>) -> Self {
        self.app_spec = Some(AppSpec {
            app_key: Some(key.into()),
        });
        self
    }

    /// Returns the application key, if present and non-empty.
    #[must_use]
    pub fn application_key(&self) -> Option<&str> {
        self.app_spec
            .as_ref()
            .and_then(|spec| spec.app_key.as_deref())
            .filter(|key| !key.is_empty())
    }
}

impl PhaseReport for JobStatus {
    fn phase(&self) -> &str {
        &self.status
    }
}

/// Body of the create-publication call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePublicationRequest {
    /// The application to publish.
    pub application_key: String,
    /// Revision to publish; always the first.
    pub application_revision: u32,
    /// Package location; always null so the platform uses the generated one.
    pub download_url: Option<String>,
}

impl CreatePublicationRequest {
    /// Creates a request for `application_key`.
    #[must_use]
    pub fn new(application_key: impl Into<String>) -> Self {
        Self {
            application_key: application_key.into(),
            application_revision: 1,
            download_url: None,
        }
    }
}

/// Response of the create-publication call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationCreated {
    /// The publication id.
    #[serde(default)]
    pub key: Option<String>,
    /// The publication's initial phase.
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of the publication-status call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationStatus {
    /// Current phase.
    #[serde(default)]
    pub status: String,
}

impl PublicationStatus {
    /// Creates a status with a phase.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

impl PhaseReport for PublicationStatus {
    fn phase(&self) -> &str {
        &self.status
    }
}

/// Response of the application-details call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDetails {
    /// Path of the application under the public host.
    #[serde(default)]
    pub url_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_create_job_body_shape() {
        let body = serde_json::to_value(CreateJobRequest::new("a todo app")).unwrap();
        assert_eq!(
            body,
            json!({"prompt": "a todo app", "files": [], "ignoreTenantContext": true})
        );
    }

    #[test]
    fn test_create_publication_body_shape() {
        let body = serde_json::to_value(CreatePublicationRequest::new("app-1")).unwrap();
        assert_eq!(
            body,
            json!({"applicationKey": "app-1", "applicationRevision": 1, "downloadUrl": null})
        );
    }

    #[test]
    fn test_job_status_application_key() {
        let done: JobStatus =
            serde_json::from_value(json!({"status": "Done", "appSpec": {"appKey": "k1"}, "x": 1}))
                .unwrap();
        assert_eq!(done.phase(), "Done");
        assert_eq!(done.application_key(), Some("k1"));

        let bare: JobStatus = serde_json::from_value(json!({"status": "Done"})).unwrap();
        assert_eq!(bare.application_key(), None);

        let empty: JobStatus =
            serde_json::from_value(json!({"status": "Done", "appSpec": {"appKey": ""}})).unwrap();
        assert_eq!(empty.application_key(), None);
    }

    #[test]
    fn test_application_details_url_path() {
        let details: ApplicationDetails =
            serde_json::from_value(json!({"urlPath": "abc123", "name": "Todo"})).unwrap();
        assert_eq!(details.url_path.as_deref(), Some("abc123"));
    }
}
