//! The ordered progress stream of a run.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::WorkflowError;

/// One item of a run's progress stream.
///
/// A stream carries any number of `Progress` items followed by exactly
/// one terminal item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A human-readable progress line.
    Progress {
        /// The line.
        message: String,
    },
    /// The run finished with a live application.
    Completed {
        /// The application's public URL.
        url: String,
    },
    /// The run failed.
    Failed {
        /// Machine-readable error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

impl ProgressEvent {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    /// Builds the terminal event for a run result.
    #[must_use]
    pub fn terminal(result: &Result<String, WorkflowError>) -> Self {
        match result {
            Ok(url) => Self::Completed { url: url.clone() },
            Err(err) => Self::Failed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// The sending half of a progress stream.
///
/// Sending fails once the receiving half is gone; the orchestrator treats
/// that as cancellation.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Creates a connected reporter and receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a reporter that drops everything and never detaches.
    #[must_use]
    pub fn discarding() -> Self {
        Self { tx: None }
    }

    /// Sends a progress line.
    pub fn progress(&self, message: impl Into<String>) -> Result<(), WorkflowError> {
        self.send(ProgressEvent::Progress {
            message: message.into(),
        })
    }

    /// Sends the terminal event for `result`.
    ///
    /// A detached consumer is ignored here; there is nothing left to stop.
    pub fn finish(&self, result: &Result<String, WorkflowError>) {
        let _ = self.send(ProgressEvent::terminal(result));
    }

    /// Returns true if the receiving half has been dropped.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.tx.as_ref().is_some_and(mpsc::UnboundedSender::is_closed)
    }

    fn send(&self, event: ProgressEvent) -> Result<(), WorkflowError> {
        match &self.tx {
            Some(tx) => tx
                .send(event)
                .map_err(|_| WorkflowError::cancelled("progress consumer detached")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.progress("one").unwrap();
        reporter.progress("two").unwrap();
        reporter.finish(&Ok("https://x/app".to_string()));

        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::Progress { message: "one".into() })
        );
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::Progress { message: "two".into() })
        );
        let last = rx.recv().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last, ProgressEvent::Completed { url: "https://x/app".into() });
    }

    #[test]
    fn test_detached_consumer_is_cancellation() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);

        assert!(reporter.is_detached());
        let err = reporter.progress("anyone?").unwrap_err();
        assert!(err.is_cancelled());
        reporter.finish(&Err(WorkflowError::cancelled("x")));
    }

    #[test]
    fn test_discarding_reporter_never_fails() {
        let reporter = ProgressReporter::discarding();
        assert!(reporter.progress("ignored").is_ok());
        assert!(!reporter.is_detached());
    }

    #[test]
    fn test_failed_event_serialization() {
        let event = ProgressEvent::terminal(&Err(WorkflowError::UnknownSession("s1".into())));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "failed",
                "kind": "unknown_session",
                "message": "Invalid or expired session ID: s1",
            })
        );
    }
}
