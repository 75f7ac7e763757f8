//! The seven-stage create-and-deploy workflow.
//!
//! [`Orchestrator`] owns the credential cache and the session registry and
//! is shared by every transport. A run goes through the stages in
//! [`WorkflowStage::ALL`] order, reporting progress lines as it goes; each
//! stage is also available on its own, keyed by session id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::progress::{ProgressEvent, ProgressReporter};
use super::stage::{PhaseCriteria, WorkflowRun, WorkflowStage};
use crate::auth::{
    AuthSettings, CommandCredentialProvider, CredentialCache, CredentialProvider, Principal,
    StaticTokenProvider,
};
use crate::cancellation::{CancelOnDrop, CancellationToken};
use crate::config::{AppflowConfig, ConfigError, PollingConfig};
use crate::errors::{RemoteError, WorkflowError};
use crate::events::{event_types, EventSink, LoggingEventSink};
use crate::poller::{PhaseReport, StagePoller};
use crate::registry::{SessionId, SessionRecord, SessionRegistry};
use crate::remote::{HttpRemoteApi, JobStatus, PublicationStatus, RemoteApi};

/// What a caller gets back when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// The local session id to use for every later step.
    pub session_id: SessionId,
    /// The remote job's initial phase, if reported.
    pub status: Option<String>,
}

/// Joins a base address and a URL path with exactly one slash.
#[must_use]
pub fn compose_url(base_address: &str, url_path: &str) -> String {
    format!(
        "{}/{}",
        base_address.trim_end_matches('/'),
        url_path.trim_start_matches('/')
    )
}

/// Drives create-and-deploy runs.
pub struct Orchestrator {
    credentials: CredentialCache,
    remote: Arc<dyn RemoteApi>,
    registry: SessionRegistry,
    polling: PollingConfig,
    base_address: String,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Creates an orchestrator with default poll intervals.
    pub fn new(
        credentials: CredentialCache,
        remote: Arc<dyn RemoteApi>,
        base_address: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            remote,
            registry: SessionRegistry::new(),
            polling: PollingConfig::default(),
            base_address: base_address.into(),
            events: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Builds the production wiring from configuration.
    ///
    /// A configured token wins over a credential command.
    pub fn from_config(config: &AppflowConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let provider: Arc<dyn CredentialProvider> = match (&config.token, &config.credential_command)
        {
            (Some(token), _) => Arc::new(StaticTokenProvider::new(token.clone())),
            (None, Some(command)) => Arc::new(CommandCredentialProvider::new(command)),
            (None, None) => {
                return Err(ConfigError::Invalid("no credential source".to_string()));
            }
        };
        let principal = Principal::new(&config.hostname, &config.username, &config.password);
        let credentials =
            CredentialCache::new(provider, principal, AuthSettings::from(&config.auth));

        let remote = HttpRemoteApi::for_hostname(&config.hostname, &config.http)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self::new(credentials, Arc::new(remote), config.resolved_base_address())
            .with_polling(config.polling.clone()))
    }

    /// Sets the poll intervals.
    #[must_use]
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses an existing session registry.
    #[must_use]
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the credential cache.
    #[must_use]
    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    /// Returns the session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Returns the base address final URLs are built on.
    #[must_use]
    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    // ------------------------------------------------------------------
    // Step-wise operations
    // ------------------------------------------------------------------

    /// Creates a remote job for `prompt` and opens a session for it.
    pub async fn start_generation(&self, prompt: &str) -> Result<SessionHandle, WorkflowError> {
        let prompt = validate_prompt(prompt)?;
        let (session_id, _job_id, status) = self.create_job(prompt).await?;
        Ok(SessionHandle { session_id, status })
    }

    /// Fetches the current job status once.
    ///
    /// A reported application key is recorded on the session.
    pub async fn job_status(&self, session_id: &SessionId) -> Result<JobStatus, WorkflowError> {
        let job_id = self.registry.get(session_id)?;
        let status = self.fetch_job_status(&job_id).await?;
        if let Some(key) = status.application_key() {
            self.registry.record_application_key(session_id, key)?;
        }
        Ok(status)
    }

    /// Asks the remote system to generate the session's application.
    pub async fn trigger_generation(&self, session_id: &SessionId) -> Result<(), WorkflowError> {
        let job_id = self.registry.get(session_id)?;
        self.trigger(&job_id).await
    }

    /// Polls until the job is ready for generation.
    pub async fn await_ready(
        &self,
        session_id: &SessionId,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
    ) -> Result<JobStatus, WorkflowError> {
        let job_id = self.registry.get(session_id)?;
        let mut run = WorkflowRun::new();
        self.poll_ready(&job_id, reporter, cancel, &mut run).await
    }

    /// Polls until generation is done and returns the application key.
    pub async fn await_generated(
        &self,
        session_id: &SessionId,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
    ) -> Result<String, WorkflowError> {
        let job_id = self.registry.get(session_id)?;
        let mut run = WorkflowRun::new();
        self.poll_built(session_id, &job_id, reporter, cancel, &mut run)
            .await
    }

    /// Starts publishing the session's application and returns the
    /// publication id.
    pub async fn start_publication(&self, session_id: &SessionId) -> Result<String, WorkflowError> {
        let record = self.registry.lookup(session_id)?;
        let application_key = require_application_key(&record)?;
        let (publication_id, _) = self.publish(session_id, &application_key).await?;
        Ok(publication_id)
    }

    /// Fetches the current publication status once.
    pub async fn publication_status(
        &self,
        session_id: &SessionId,
    ) -> Result<PublicationStatus, WorkflowError> {
        let record = self.registry.lookup(session_id)?;
        let publication_id = require_publication_id(&record)?;
        self.fetch_publication_status(&publication_id).await
    }

    /// Polls until the publication is live.
    pub async fn await_published(
        &self,
        session_id: &SessionId,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
    ) -> Result<PublicationStatus, WorkflowError> {
        let record = self.registry.lookup(session_id)?;
        let publication_id = require_publication_id(&record)?;
        let mut run = WorkflowRun::new();
        self.poll_published(&publication_id, reporter, cancel, &mut run)
            .await
    }

    /// Returns the public URL of the session's application.
    pub async fn resolve_location(&self, session_id: &SessionId) -> Result<String, WorkflowError> {
        let record = self.registry.lookup(session_id)?;
        let application_key = require_application_key(&record)?;
        self.locate(&application_key).await
    }

    /// Closes a session.
    pub fn close_session(&self, session_id: &SessionId) -> Option<SessionRecord> {
        let record = self.registry.remove(session_id);
        if record.is_some() {
            debug!(session_id = %session_id, "Session closed");
        }
        record
    }

    // ------------------------------------------------------------------
    // Whole runs
    // ------------------------------------------------------------------

    /// Runs all seven stages and returns the application's URL.
    ///
    /// Every stage reports at least one progress line. On failure a final
    /// `Error during <stage>: <message>` line is reported before the error
    /// is returned. A detached `reporter` cancels the run.
    pub async fn create_and_deploy(
        &self,
        prompt: &str,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
    ) -> Result<String, WorkflowError> {
        let mut run = WorkflowRun::new();
        self.events.try_emit(
            event_types::WORKFLOW_STARTED,
            Some(serde_json::json!({ "prompt_chars": prompt.chars().count() })),
        );

        let result = self.drive(prompt, reporter, cancel, &mut run).await;

        match &result {
            Ok(url) => {
                info!(url = %url, "Workflow completed");
                self.events.try_emit(
                    event_types::WORKFLOW_COMPLETED,
                    Some(serde_json::json!({ "url": url, "phases": run.phases() })),
                );
            }
            Err(err) => {
                let stage = run.failed_stage().unwrap_or(WorkflowStage::CreateJob);
                error!(stage = %stage, kind = err.kind(), error = %err, "Workflow failed");
                // The consumer may already be gone; the error is returned regardless.
                let _ = reporter.progress(format!("Error during {stage}: {err}"));
                let mut data = err.to_dict();
                data.insert("failed_stage".to_string(), serde_json::json!(stage.name()));
                data.insert("state".to_string(), serde_json::json!(run.state().to_string()));
                self.events
                    .try_emit(event_types::WORKFLOW_FAILED, serde_json::to_value(data).ok());
            }
        }

        result
    }

    /// Runs [`Self::create_and_deploy`] with an overall deadline.
    ///
    /// When the deadline passes the run is cancelled at its next
    /// cancellation point; a remote call already in flight still runs to
    /// its own timeout.
    pub async fn run_with_deadline(
        &self,
        prompt: &str,
        reporter: &ProgressReporter,
        deadline: Duration,
    ) -> Result<String, WorkflowError> {
        let cancel = CancellationToken::shared();
        let timer = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel(format!(
                    "deadline of {}s exceeded",
                    deadline.as_secs_f64()
                ));
            })
        };

        let result = self.create_and_deploy(prompt, reporter, &cancel).await;
        timer.abort();
        result
    }

    /// Starts a run on its own task.
    ///
    /// The returned handle yields the progress stream and cancels the run
    /// when dropped.
    pub fn spawn_run(self: &Arc<Self>, prompt: impl Into<String>) -> RunHandle {
        let prompt = prompt.into();
        let (reporter, events) = ProgressReporter::channel();
        let cancel = CancellationToken::shared();

        let orchestrator = Arc::clone(self);
        let run_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            let result = orchestrator
                .create_and_deploy(&prompt, &reporter, &run_cancel)
                .await;
            reporter.finish(&result);
            result
        });

        RunHandle {
            events,
            guard: CancelOnDrop::new(cancel, "run handle dropped"),
            task,
        }
    }

    async fn drive(
        &self,
        prompt: &str,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
        run: &mut WorkflowRun,
    ) -> Result<String, WorkflowError> {
        // Stage 1
        let stage = WorkflowStage::CreateJob;
        let created = async {
            let prompt = validate_prompt(prompt)?;
            reporter.progress("Fetching API token...")?;
            self.credentials.bearer().await?;
            checkpoint(cancel)?;
            reporter.progress(stage.announcement())?;
            let created = self.create_job(prompt).await?;
            checkpoint(cancel)?;
            reporter.progress(format!("  -> Job created with ID: {}", created.1))?;
            Ok::<_, WorkflowError>(created)
        }
        .await;
        let (session_id, job_id, _) = self.settle(run, stage, None, created)?;

        // Stage 2
        let stage = WorkflowStage::PollReady;
        let ready = async {
            reporter.progress(stage.announcement())?;
            let status = self.poll_ready(&job_id, reporter, cancel, run).await?;
            reporter.progress(format!(
                "  -> Status is {}. Proceeding to next step.",
                status.phase()
            ))?;
            Ok::<_, WorkflowError>(())
        }
        .await;
        self.settle(run, stage, Some(&session_id), ready)?;

        // Stage 3
        let stage = WorkflowStage::TriggerBuild;
        let triggered = async {
            checkpoint(cancel)?;
            reporter.progress(stage.announcement())?;
            self.trigger(&job_id).await?;
            checkpoint(cancel)?;
            reporter.progress("  -> Generation triggered.")?;
            Ok::<_, WorkflowError>(())
        }
        .await;
        self.settle(run, stage, Some(&session_id), triggered)?;

        // Stage 4
        let stage = WorkflowStage::PollBuilt;
        let built = async {
            reporter.progress(stage.announcement())?;
            let key = self
                .poll_built(&session_id, &job_id, reporter, cancel, run)
                .await?;
            reporter.progress(format!(
                "  -> Generation Succeeded. Acquired Application Key: {key}"
            ))?;
            Ok::<_, WorkflowError>(key)
        }
        .await;
        let application_key = self.settle(run, stage, Some(&session_id), built)?;

        // Stage 5
        let stage = WorkflowStage::StartPublication;
        let published = async {
            checkpoint(cancel)?;
            reporter.progress(stage.announcement())?;
            let (publication_id, status) = self.publish(&session_id, &application_key).await?;
            checkpoint(cancel)?;
            if let Some(status) = status {
                run.observe(stage, status.as_str(), Utc::now());
                reporter.progress(format!("  -> Current status: {status}"))?;
            }
            reporter.progress(format!(
                "  -> Publication started with Key: {publication_id}"
            ))?;
            Ok::<_, WorkflowError>(publication_id)
        }
        .await;
        let publication_id = self.settle(run, stage, Some(&session_id), published)?;

        // Stage 6
        let stage = WorkflowStage::PollPublished;
        let live = async {
            reporter.progress(stage.announcement())?;
            self.poll_published(&publication_id, reporter, cancel, run)
                .await?;
            reporter.progress("  -> Publication Succeeded.")?;
            Ok::<_, WorkflowError>(())
        }
        .await;
        self.settle(run, stage, Some(&session_id), live)?;

        // Stage 7
        let stage = WorkflowStage::ResolveLocation;
        let located = async {
            checkpoint(cancel)?;
            reporter.progress(stage.announcement())?;
            let url = self.locate(&application_key).await?;
            checkpoint(cancel)?;
            reporter.progress(format!("Application is live: {url}"))?;
            Ok::<_, WorkflowError>(url)
        }
        .await;
        let url = self.settle(run, stage, Some(&session_id), located)?;
        run.set_url(url.clone());

        Ok(url)
    }

    /// Advances `run` past `stage` on success, or marks it failed there.
    fn settle<T>(
        &self,
        run: &mut WorkflowRun,
        stage: WorkflowStage,
        session_id: Option<&SessionId>,
        result: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        match result {
            Ok(value) => {
                run.complete(stage);
                info!(stage = %stage, state = %run.state(), "Stage completed");
                self.events.try_emit(
                    event_types::STAGE_COMPLETED,
                    Some(serde_json::json!({
                        "stage": stage.name(),
                        "number": stage.number(),
                        "state": run.state().to_string(),
                        "session_id": session_id.map(SessionId::as_str),
                    })),
                );
                Ok(value)
            }
            Err(err) => {
                run.fail(stage);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage bodies shared by whole runs and step-wise calls
    // ------------------------------------------------------------------

    async fn create_job(
        &self,
        prompt: &str,
    ) -> Result<(SessionId, String, Option<String>), WorkflowError> {
        let token = self.credentials.bearer().await?;
        let created = self.remote.create_job(&token, prompt).await?;
        let job_id = created
            .key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                WorkflowError::Creation("API did not return a valid job key".to_string())
            })?;

        let session_id = self.registry.register(job_id.clone());
        info!(session_id = %session_id, job_id = %job_id, "Generation job created");
        self.events.try_emit(
            event_types::SESSION_CREATED,
            Some(serde_json::json!({ "session_id": session_id.as_str(), "job_id": job_id })),
        );
        Ok((session_id, job_id, created.status))
    }

    async fn fetch_job_status(&self, job_id: &str) -> Result<JobStatus, WorkflowError> {
        let token = self.credentials.bearer().await?;
        Ok(self.remote.job_status(&token, job_id).await?)
    }

    async fn trigger(&self, job_id: &str) -> Result<(), WorkflowError> {
        let token = self.credentials.bearer().await?;
        match self.remote.trigger_generation(&token, job_id).await {
            Ok(()) => {
                info!(job_id = %job_id, "Generation triggered");
                Ok(())
            }
            Err(err @ RemoteError::Status { .. }) => Err(WorkflowError::Trigger(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn poll_ready(
        &self,
        job_id: &str,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
        run: &mut WorkflowRun,
    ) -> Result<JobStatus, WorkflowError> {
        let stage = WorkflowStage::PollReady;
        StagePoller::new(stage, self.polling.ready_interval())
            .with_cancellation(Arc::clone(cancel))
            .poll_phases(
                || self.fetch_job_status(job_id),
                PhaseCriteria::JOB_READY,
                |status: &JobStatus| report_phase(run, stage, status, reporter),
            )
            .await
    }

    async fn poll_built(
        &self,
        session_id: &SessionId,
        job_id: &str,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
        run: &mut WorkflowRun,
    ) -> Result<String, WorkflowError> {
        let stage = WorkflowStage::PollBuilt;
        let status = StagePoller::new(stage, self.polling.build_interval())
            .with_cancellation(Arc::clone(cancel))
            .poll_phases(
                || self.fetch_job_status(job_id),
                PhaseCriteria::JOB_BUILT,
                |status: &JobStatus| report_phase(run, stage, status, reporter),
            )
            .await?;

        let key = status.application_key().ok_or_else(|| {
            WorkflowError::MissingArtifact(
                "Generation succeeded, but no application key was provided".to_string(),
            )
        })?;
        Ok(self.registry.record_application_key(session_id, key)?)
    }

    /// Creates a publication and returns the session's publication id with
    /// the initial phase, if one was reported.
    async fn publish(
        &self,
        session_id: &SessionId,
        application_key: &str,
    ) -> Result<(String, Option<String>), WorkflowError> {
        let token = self.credentials.bearer().await?;
        let created = self
            .remote
            .create_publication(&token, application_key)
            .await?;
        let publication_id = created
            .key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                WorkflowError::PublicationStart(
                    "API did not return a valid publication key".to_string(),
                )
            })?;

        let publication_id = self
            .registry
            .record_publication(session_id, publication_id)?;
        info!(session_id = %session_id, publication_id = %publication_id, "Publication started");
        Ok((publication_id, created.status))
    }

    async fn fetch_publication_status(
        &self,
        publication_id: &str,
    ) -> Result<PublicationStatus, WorkflowError> {
        let token = self.credentials.bearer().await?;
        Ok(self
            .remote
            .publication_status(&token, publication_id)
            .await?)
    }

    async fn poll_published(
        &self,
        publication_id: &str,
        reporter: &ProgressReporter,
        cancel: &Arc<CancellationToken>,
        run: &mut WorkflowRun,
    ) -> Result<PublicationStatus, WorkflowError> {
        let stage = WorkflowStage::PollPublished;
        StagePoller::new(stage, self.polling.publish_interval())
            .with_cancellation(Arc::clone(cancel))
            .poll_phases(
                || self.fetch_publication_status(publication_id),
                PhaseCriteria::PUBLICATION,
                |status: &PublicationStatus| report_phase(run, stage, status, reporter),
            )
            .await
    }

    async fn locate(&self, application_key: &str) -> Result<String, WorkflowError> {
        let token = self.credentials.bearer().await?;
        let details = self
            .remote
            .application_details(&token, application_key)
            .await?;
        let url_path = details
            .url_path
            .filter(|path| !path.trim_matches('/').trim().is_empty())
            .ok_or_else(|| {
                WorkflowError::LocationResolution(
                    "Could not retrieve final application URL".to_string(),
                )
            })?;
        Ok(compose_url(&self.base_address, &url_path))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("base_address", &self.base_address)
            .field("polling", &self.polling)
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// A run started with [`Orchestrator::spawn_run`].
///
/// Dropping the handle cancels the run.
#[derive(Debug)]
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    guard: CancelOnDrop,
    task: JoinHandle<Result<String, WorkflowError>>,
}

impl RunHandle {
    /// Receives the next progress event; `None` once the run has ended.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Requests cancellation.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.guard.token().cancel(reason);
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        Arc::clone(self.guard.token())
    }

    /// Waits for the run to finish, discarding any unread progress.
    pub async fn join(self) -> Result<String, WorkflowError> {
        let Self {
            mut events,
            guard,
            task,
        } = self;
        // Keep the receiver open so the run is not mistaken for detached.
        while events.recv().await.is_some() {}
        let result = task
            .await
            .unwrap_or_else(|e| Err(WorkflowError::cancelled(format!("run task ended: {e}"))));
        drop(guard);
        result
    }
}

fn validate_prompt(prompt: &str) -> Result<&str, WorkflowError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        Err(WorkflowError::InvalidInput(
            "prompt must not be empty".to_string(),
        ))
    } else {
        Ok(trimmed)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), WorkflowError> {
    if cancel.is_cancelled() {
        Err(WorkflowError::cancelled(
            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        ))
    } else {
        Ok(())
    }
}

fn report_phase<S: PhaseReport>(
    run: &mut WorkflowRun,
    stage: WorkflowStage,
    status: &S,
    reporter: &ProgressReporter,
) -> Result<(), WorkflowError> {
    run.observe(stage, status.phase(), Utc::now());
    reporter.progress(format!("  -> Current status: {}", status.phase()))
}

fn require_application_key(record: &SessionRecord) -> Result<String, WorkflowError> {
    record.application_key.clone().ok_or_else(|| {
        WorkflowError::MissingArtifact(format!(
            "no application key recorded for session {}; generation has not completed",
            record.session_id
        ))
    })
}

fn require_publication_id(record: &SessionRecord) -> Result<String, WorkflowError> {
    record.publication_id.clone().ok_or_else(|| {
        WorkflowError::MissingArtifact(format!(
            "no publication recorded for session {}; publication has not started",
            record.session_id
        ))
    })
}
