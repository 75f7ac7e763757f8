//! Error types for the appflow orchestration core.
//!
//! Every failure a workflow run can hit maps onto one tagged variant of
//! [`WorkflowError`], so callers and tests branch on the kind instead of
//! matching message text.

use std::collections::HashMap;
use thiserror::Error;

use crate::workflow::WorkflowStage;

/// The main error type for workflow operations.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// The credential provider could not produce a token.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The create-job call returned no usable job identifier.
    #[error("Job creation failed: {0}")]
    Creation(String),

    /// The trigger-generation call was rejected by the remote system.
    #[error("Generation trigger failed: {0}")]
    Trigger(String),

    /// The create-publication call returned no usable publication identifier.
    #[error("Publication start failed: {0}")]
    PublicationStart(String),

    /// The application details carried no URL path.
    #[error("Location resolution failed: {0}")]
    LocationResolution(String),

    /// The remote system reported a terminal failure phase.
    #[error("Stage '{stage}' reported terminal phase '{phase}'")]
    StageFailure {
        /// The stage whose poll observed the failure.
        stage: WorkflowStage,
        /// The phase reported by the remote system.
        phase: String,
    },

    /// A success phase was reached but a required payload field was absent.
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// The session id was never issued (or has been closed).
    #[error("Invalid or expired session ID: {0}")]
    UnknownSession(String),

    /// A remote call failed at the transport level.
    #[error("{0}")]
    Transport(#[from] RemoteError),

    /// The run was cancelled or its consumer detached.
    #[error("Workflow cancelled: {0}")]
    Cancelled(String),

    /// The caller supplied unusable input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WorkflowError {
    /// Creates a stage failure error.
    #[must_use]
    pub fn stage_failure(stage: WorkflowStage, phase: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            phase: phase.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Returns a stable machine-readable name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_failure",
            Self::Creation(_) => "creation_failure",
            Self::Trigger(_) => "trigger_failure",
            Self::PublicationStart(_) => "publication_start_failure",
            Self::LocationResolution(_) => "location_resolution_failure",
            Self::StageFailure { .. } => "stage_failure",
            Self::MissingArtifact(_) => "missing_artifact",
            Self::UnknownSession(_) => "unknown_session",
            Self::Transport(_) => "transport_failure",
            Self::Cancelled(_) => "cancelled",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// Returns true if the error came from cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Converts to a dictionary representation for RPC error payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::StageFailure { stage, phase } => {
                map.insert("stage".to_string(), serde_json::json!(stage.name()));
                map.insert("phase".to_string(), serde_json::json!(phase));
            }
            Self::Transport(RemoteError::Status { status, .. }) => {
                map.insert("status".to_string(), serde_json::json!(status));
            }
            _ => {}
        }

        map
    }
}

/// Errors raised while obtaining a bearer credential.
///
/// Cloneable so a single failed refresh can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The provider itself failed.
    #[error("credential provider failed: {0}")]
    Provider(String),

    /// The provider returned an empty token.
    #[error("credential provider returned an empty token")]
    EmptyToken,

    /// The provider returned a token that expires inside the skew window.
    #[error("credential provider returned a token expiring at {expires_at}")]
    Expired {
        /// The expiry decoded from the token.
        expires_at: crate::utils::Timestamp,
    },
}

impl AuthError {
    /// Creates a provider failure.
    #[must_use]
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider(reason.into())
    }
}

/// Errors raised by a single remote API call.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The remote system answered with a non-success HTTP status.
    #[error("API error ({operation}): HTTP {status} {body}")]
    Status {
        /// The remote operation name.
        operation: String,
        /// The HTTP status code.
        status: u16,
        /// A prefix of the response body.
        body: String,
    },

    /// The call did not complete within its timeout.
    #[error("API error ({operation}): timed out after {timeout_seconds}s")]
    Timeout {
        /// The remote operation name.
        operation: String,
        /// The configured timeout.
        timeout_seconds: f64,
    },

    /// The request could not be sent or the connection broke.
    #[error("API error ({operation}): {reason}")]
    Request {
        /// The remote operation name.
        operation: String,
        /// The underlying failure.
        reason: String,
    },

    /// The response body could not be decoded.
    #[error("API error ({operation}): unreadable response body: {reason}")]
    Decode {
        /// The remote operation name.
        operation: String,
        /// The decoding failure.
        reason: String,
    },
}

impl RemoteError {
    /// Creates a non-success status error.
    #[must_use]
    pub fn status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates a request error.
    #[must_use]
    pub fn request(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Request {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns the remote operation this error belongs to.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Status { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Request { operation, .. }
            | Self::Decode { operation, .. } => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(WorkflowError::UnknownSession("s".into()).kind(), "unknown_session");
        assert_eq!(
            WorkflowError::from(AuthError::EmptyToken).kind(),
            "auth_failure"
        );
        assert_eq!(
            WorkflowError::from(RemoteError::status("getJobStatus", 502, "")).kind(),
            "transport_failure"
        );
    }

    #[test]
    fn test_stage_failure_to_dict() {
        let err = WorkflowError::stage_failure(WorkflowStage::PollReady, "Failed");
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "stage_failure");
        assert_eq!(dict.get("stage").unwrap(), "poll_ready");
        assert_eq!(dict.get("phase").unwrap(), "Failed");
        assert!(err.to_string().contains("poll_ready"));
    }

    #[test]
    fn test_remote_status_message() {
        let err = RemoteError::status("createJob", 401, "unauthorized");
        assert_eq!(err.to_string(), "API error (createJob): HTTP 401 unauthorized");
        assert_eq!(err.operation(), "createJob");

        let dict = WorkflowError::from(err).to_dict();
        assert_eq!(dict.get("status").unwrap(), 401);
    }

    #[test]
    fn test_cancelled_is_flagged() {
        assert!(WorkflowError::cancelled("caller left").is_cancelled());
        assert!(!WorkflowError::Creation("no key".into()).is_cancelled());
    }
}
