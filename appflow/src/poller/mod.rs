//! Retry-until-terminal polling for a single workflow stage.
//!
//! A [`StagePoller`] repeatedly fetches a status, reports every observed
//! phase, and stops on the stage's success or failure phase. There is no
//! attempt limit; the only ways out besides a terminal phase are a failed
//! fetch and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::errors::WorkflowError;
use crate::workflow::{PhaseCriteria, WorkflowStage};

/// A status value that carries a phase.
pub trait PhaseReport {
    /// Returns the phase reported by the remote system.
    fn phase(&self) -> &str;
}

/// Polls one stage until it reaches a terminal phase.
#[derive(Debug, Clone)]
pub struct StagePoller {
    stage: WorkflowStage,
    interval: Duration,
    cancel: Arc<CancellationToken>,
}

impl StagePoller {
    /// Creates a poller for `stage` that waits `interval` between fetches.
    #[must_use]
    pub fn new(stage: WorkflowStage, interval: Duration) -> Self {
        Self {
            stage,
            interval,
            cancel: CancellationToken::shared(),
        }
    }

    /// Uses `cancel` to stop the poll early.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the stage being polled.
    #[must_use]
    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    /// Returns the delay between fetches.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs the poll loop.
    ///
    /// `on_progress` sees every fetched status, including the first and the
    /// terminal one. An error from `on_progress` or `fetch` ends the poll
    /// with that error.
    pub async fn poll<S, F, Fut, P>(
        &self,
        mut fetch: F,
        is_success: impl Fn(&S) -> bool,
        is_failure: impl Fn(&S) -> bool,
        mut on_progress: P,
    ) -> Result<S, WorkflowError>
    where
        S: PhaseReport,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, WorkflowError>>,
        P: FnMut(&S) -> Result<(), WorkflowError>,
    {
        let mut attempt: u64 = 0;
        loop {
            self.check_cancelled()?;
            attempt += 1;

            let status = fetch().await?;
            // A fetch already in flight when cancellation arrived still
            // completes, but nothing it returned is acted on.
            self.check_cancelled()?;

            debug!(
                stage = %self.stage,
                attempt,
                phase = status.phase(),
                "Polled stage status"
            );
            on_progress(&status)?;

            if is_success(&status) {
                return Ok(status);
            }
            if is_failure(&status) {
                return Err(WorkflowError::stage_failure(self.stage, status.phase()));
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = self.cancel.cancelled() => {
                    return Err(self.cancellation_error());
                }
            }
        }
    }

    /// Runs the poll loop against a fixed pair of terminal phases.
    pub async fn poll_phases<S, F, Fut, P>(
        &self,
        fetch: F,
        criteria: PhaseCriteria,
        on_progress: P,
    ) -> Result<S, WorkflowError>
    where
        S: PhaseReport,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, WorkflowError>>,
        P: FnMut(&S) -> Result<(), WorkflowError>,
    {
        self.poll(
            fetch,
            |status: &S| criteria.is_success(status.phase()),
            |status: &S| criteria.is_failure(status.phase()),
            on_progress,
        )
        .await
    }

    fn check_cancelled(&self) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            Err(self.cancellation_error())
        } else {
            Ok(())
        }
    }

    fn cancellation_error(&self) -> WorkflowError {
        let reason = self
            .cancel
            .reason()
            .unwrap_or_else(|| format!("{} cancelled", self.stage));
        WorkflowError::cancelled(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    struct Phase(String);

    impl PhaseReport for Phase {
        fn phase(&self) -> &str {
            &self.0
        }
    }

    fn script(phases: &[&str]) -> Arc<Mutex<VecDeque<Phase>>> {
        Arc::new(Mutex::new(
            phases.iter().map(|p| Phase((*p).to_string())).collect(),
        ))
    }

    fn fetch_from(
        queue: Arc<Mutex<VecDeque<Phase>>>,
    ) -> impl FnMut() -> std::future::Ready<Result<Phase, WorkflowError>> {
        move || {
            let next = queue
                .lock()
                .pop_front()
                .ok_or_else(|| RemoteError::request("getJobStatus", "script exhausted").into());
            std::future::ready(next)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_phase_until_success() {
        let queue = script(&["Queued", "Queued", "ReadyToGenerate"]);
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_secs(5));
        let mut seen = Vec::new();

        let status = poller
            .poll_phases(fetch_from(queue), PhaseCriteria::JOB_READY, |s: &Phase| {
                seen.push(s.0.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(status.0, "ReadyToGenerate");
        assert_eq!(seen, vec!["Queued", "Queued", "ReadyToGenerate"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_phase_is_stage_failure() {
        let queue = script(&["Processing", "Failed", "Done"]);
        let poller = StagePoller::new(WorkflowStage::PollBuilt, Duration::from_secs(10));

        let err = poller
            .poll_phases(fetch_from(queue.clone()), PhaseCriteria::JOB_BUILT, |_: &Phase| Ok(()))
            .await
            .unwrap_err();

        match err {
            WorkflowError::StageFailure { stage, phase } => {
                assert_eq!(stage, WorkflowStage::PollBuilt);
                assert_eq!(phase, "Failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(queue.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_interval_between_fetches() {
        let queue = script(&["Running", "Running", "Finished"]);
        let poller = StagePoller::new(WorkflowStage::PollPublished, Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        poller
            .poll_phases(fetch_from(queue), PhaseCriteria::PUBLICATION, |_: &Phase| Ok(()))
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(21), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_aborts_without_retry() {
        let calls = Arc::new(Mutex::new(0_u32));
        let counter = calls.clone();
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_secs(5));

        let err = poller
            .poll_phases(
                move || {
                    *counter.lock() += 1;
                    std::future::ready(Err::<Phase, WorkflowError>(
                        RemoteError::status("getJobStatus", 500, "boom").into(),
                    ))
                },
                PhaseCriteria::JOB_READY,
                |_: &Phase| Ok(()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transport_failure");
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_returns_promptly() {
        let cancel = CancellationToken::shared();
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_secs(3600))
            .with_cancellation(cancel.clone());

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel("caller detached");
            })
        };

        let started = tokio::time::Instant::now();
        let err = poller
            .poll_phases(
                || std::future::ready(Ok(Phase("Queued".into()))),
                PhaseCriteria::JOB_READY,
                |_: &Phase| Ok(()),
            )
            .await
            .unwrap_err();

        canceller.await.unwrap();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Workflow cancelled: caller detached");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_fetches() {
        let cancel = CancellationToken::shared();
        cancel.cancel("stop");
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_millis(1))
            .with_cancellation(cancel);
        let mut fetched = false;

        let err = poller
            .poll_phases(
                || {
                    fetched = true;
                    std::future::ready(Ok(Phase("Queued".into())))
                },
                PhaseCriteria::JOB_READY,
                |_: &Phase| Ok(()),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!fetched);
    }

    #[tokio::test]
    async fn test_result_discarded_when_cancelled_mid_fetch() {
        let cancel = CancellationToken::shared();
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_millis(1))
            .with_cancellation(cancel.clone());
        let mut reported = 0;

        let err = poller
            .poll_phases(
                || {
                    cancel.cancel("gone");
                    std::future::ready(Ok(Phase("ReadyToGenerate".into())))
                },
                PhaseCriteria::JOB_READY,
                |_: &Phase| {
                    reported += 1;
                    Ok(())
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(reported, 0);
    }

    #[tokio::test]
    async fn test_progress_error_stops_poll() {
        let queue = script(&["Queued", "ReadyToGenerate"]);
        let poller = StagePoller::new(WorkflowStage::PollReady, Duration::from_millis(1));

        let err = poller
            .poll_phases(fetch_from(queue.clone()), PhaseCriteria::JOB_READY, |_: &Phase| {
                Err(WorkflowError::cancelled("progress consumer detached"))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(queue.lock().len(), 1);
    }
}
