//! Maps parsed tool calls onto orchestrator operations.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::tools::ToolCall;
use crate::errors::WorkflowError;
use crate::workflow::{Orchestrator, RunHandle};

/// Executes tool calls against a shared [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    orchestrator: Arc<Orchestrator>,
}

impl ToolExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Returns the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Starts a streaming create-and-deploy run.
    pub fn start_run(&self, prompt: &str) -> RunHandle {
        self.orchestrator.spawn_run(prompt)
    }

    /// Executes a call to completion and returns its JSON result.
    ///
    /// `createAndDeployApp` is run without streaming; its result is
    /// `{"url": ...}`.
    pub async fn call(&self, call: &ToolCall) -> Result<Value, WorkflowError> {
        debug!(tool = call.name(), "Executing tool");
        let orchestrator = &self.orchestrator;
        match call {
            ToolCall::CreateAndDeployApp { prompt } => {
                let url = self.start_run(prompt).join().await?;
                Ok(json!({ "url": url }))
            }
            ToolCall::StartGeneration { prompt } => {
                let handle = orchestrator.start_generation(prompt).await?;
                Ok(json!({
                    "sessionId": handle.session_id,
                    "status": handle.status,
                    "message": "Generation job created. Poll getStatus until 'ReadyToGenerate'.",
                }))
            }
            ToolCall::GetStatus(session_id) => {
                let status = orchestrator.job_status(session_id).await?;
                Ok(json!({
                    "sessionId": session_id,
                    "status": status.status,
                    "applicationKey": status.application_key(),
                }))
            }
            ToolCall::TriggerGeneration(session_id) => {
                orchestrator.trigger_generation(session_id).await?;
                Ok(json!({
                    "sessionId": session_id,
                    "message": "Generation triggered. Poll getStatus until 'Done'.",
                }))
            }
            ToolCall::StartPublication(session_id) => {
                let publication_id = orchestrator.start_publication(session_id).await?;
                Ok(json!({
                    "sessionId": session_id,
                    "publicationId": publication_id,
                }))
            }
            ToolCall::GetPublicationStatus(session_id) => {
                let status = orchestrator.publication_status(session_id).await?;
                Ok(json!({
                    "sessionId": session_id,
                    "status": status.status,
                }))
            }
            ToolCall::GetApplicationDetails(session_id) => {
                let url = orchestrator.resolve_location(session_id).await?;
                Ok(json!({
                    "sessionId": session_id,
                    "url": url,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSettings, CredentialCache, Principal, StaticTokenProvider};
    use crate::config::PollingConfig;
    use crate::registry::SessionId;
    use crate::testing::ScriptedRemoteApi;
    use pretty_assertions::assert_eq;

    fn executor(remote: ScriptedRemoteApi) -> ToolExecutor {
        let credentials = CredentialCache::new(
            Arc::new(StaticTokenProvider::new("tok")),
            Principal::default(),
            AuthSettings::default(),
        );
        let orchestrator =
            Orchestrator::new(credentials, Arc::new(remote), "https://env-dev.outsystems.app")
                .with_polling(PollingConfig::uniform(1));
        ToolExecutor::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_step_tools_share_a_session() {
        let executor = executor(
            ScriptedRemoteApi::new()
                .with_job("job-1")
                .with_job_phases(&["ReadyToGenerate"])
                .with_job_status(crate::remote::JobStatus::new("Done").with_application_key("k"))
                .with_publication("pub-1")
                .with_publication_phases(&["Finished"])
                .with_url_path("/k"),
        );

        let started = executor
            .call(&ToolCall::StartGeneration {
                prompt: "todo app".into(),
            })
            .await
            .unwrap();
        let session = SessionId::from(started["sessionId"].as_str().unwrap());

        let ready = executor.call(&ToolCall::GetStatus(session.clone())).await.unwrap();
        assert_eq!(ready["status"], "ReadyToGenerate");
        executor
            .call(&ToolCall::TriggerGeneration(session.clone()))
            .await
            .unwrap();
        let done = executor.call(&ToolCall::GetStatus(session.clone())).await.unwrap();
        assert_eq!(done["applicationKey"], "k");

        let publication = executor
            .call(&ToolCall::StartPublication(session.clone()))
            .await
            .unwrap();
        assert_eq!(publication["publicationId"], "pub-1");
        let published = executor
            .call(&ToolCall::GetPublicationStatus(session.clone()))
            .await
            .unwrap();
        assert_eq!(published["status"], "Finished");

        let details = executor
            .call(&ToolCall::GetApplicationDetails(session))
            .await
            .unwrap();
        assert_eq!(details["url"], "https://env-dev.outsystems.app/k");
    }

    #[tokio::test]
    async fn test_unknown_session_reports_session_error() {
        let executor = executor(ScriptedRemoteApi::new());
        let err = executor
            .call(&ToolCall::GetStatus(SessionId::from("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid or expired session ID: nope");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_deploy_without_streaming() {
        let executor = executor(ScriptedRemoteApi::happy_path());
        let result = executor
            .call(&ToolCall::CreateAndDeployApp {
                prompt: "todo app".into(),
            })
            .await
            .unwrap();
        assert_eq!(result, json!({"url": "https://env-dev.outsystems.app/app1"}));
    }
}
