//! Async driver for conversion-status polling.
//!
//! [`StatusPoller`] issues status calls at a fixed interval and feeds every
//! result into a [`PollSession`]; all transition logic lives there. The
//! driver only performs I/O and sleeps, checking the cancellation token
//! between calls. An in-flight status call is always allowed to resolve.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use testdeck_core::remote::{JobStatusSource, RemoteError, STATUS_CONFLICT, STATUS_NOT_FOUND};
use testdeck_core::types::DbId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::events::{EventBus, OrchestrationEvent};
use crate::poll_session::{PollReport, PollSession, PollStep, Severity};

/// Errors surfaced by [`StatusPoller`].
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// A session for this job is already running.
    #[error("Job {0} is already being polled")]
    AlreadyPolling(DbId),

    /// The session was stopped before reaching a terminal outcome.
    #[error("Polling was stopped")]
    Stopped,

    #[error("Conversion of document {0} is already running")]
    ConversionAlreadyRunning(DbId),

    #[error("Document {0} not found")]
    JobNotFound(DbId),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

type Registry = Arc<Mutex<HashSet<DbId>>>;

/// Removes a job id from the active-session registry when dropped.
#[derive(Debug)]
struct SessionGuard {
    registry: Registry,
    job_id: DbId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Polls remote conversion jobs until they reach a terminal outcome.
pub struct StatusPoller<S> {
    source: Arc<S>,
    config: PollConfig,
    events: EventBus,
    active: Registry,
}

impl<S> Clone for StatusPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            events: self.events.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: JobStatusSource> StatusPoller<S> {
    pub fn new(source: Arc<S>, config: PollConfig, events: EventBus) -> Self {
        Self {
            source,
            config,
            events,
            active: Arc::default(),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Whether a session for `job_id` is currently running.
    pub fn is_polling(&self, job_id: DbId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }

    /// Ask the backend to start converting `job_id`.
    pub async fn start_conversion(&self, job_id: DbId) -> Result<(), PollError> {
        self.source
            .start_conversion(job_id)
            .await
            .map_err(|e| match e.status() {
                Some(STATUS_CONFLICT) => PollError::ConversionAlreadyRunning(job_id),
                Some(STATUS_NOT_FOUND) => PollError::JobNotFound(job_id),
                _ => PollError::Remote(e),
            })?;
        tracing::info!(job_id, "Conversion started");
        Ok(())
    }

    /// Poll `job_id` inline until a terminal outcome or until `cancel` fires.
    pub async fn poll(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let _guard = self.register(job_id)?;
        self.drive(job_id, cancel).await
    }

    /// Spawn a background session for `job_id`.
    ///
    /// `on_terminal` runs exactly once when the session reaches a terminal
    /// outcome, and never if the session is stopped first.
    pub fn start<F>(&self, job_id: DbId, on_terminal: F) -> Result<PollHandle, PollError>
    where
        S: 'static,
        F: FnOnce(PollReport) + Send + 'static,
    {
        let guard = self.register(job_id)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = self.clone();

        let task = tokio::spawn(async move {
            let result = poller.drive(job_id, &token).await;
            // Release the job id first so the callback may start a new session.
            drop(guard);
            if let Ok(report) = &result {
                on_terminal(report.clone());
            }
            result
        });

        Ok(PollHandle {
            job_id,
            cancel,
            task,
        })
    }

    fn register(&self, job_id: DbId) -> Result<SessionGuard, PollError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(job_id) {
            return Err(PollError::AlreadyPolling(job_id));
        }
        Ok(SessionGuard {
            registry: Arc::clone(&self.active),
            job_id,
        })
    }

    async fn drive(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let mut session = PollSession::new(job_id, &self.config);
        session.begin();
        tracing::info!(
            job_id,
            interval_ms = self.config.interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Polling conversion status",
        );

        loop {
            if cancel.is_cancelled() {
                tracing::info!(job_id, attempt = session.attempt(), "Polling stopped");
                return Err(PollError::Stopped);
            }

            let result = self.source.fetch_status(job_id).await;

            // A stop requested during the call discards its result.
            if cancel.is_cancelled() {
                tracing::info!(job_id, attempt = session.attempt(), "Polling stopped");
                return Err(PollError::Stopped);
            }

            match &result {
                Ok(status) => tracing::debug!(
                    job_id,
                    attempt = session.attempt() + 1,
                    status = status.status.as_str(),
                    progress = status.progress(),
                    "Status polled",
                ),
                Err(e) => tracing::warn!(
                    job_id,
                    attempt = session.attempt() + 1,
                    consecutive = session.consecutive_transient_errors() + 1,
                    error = %e,
                    "Status poll failed",
                ),
            }

            match session.observe(result) {
                PollStep::Continue => {
                    self.events.publish(OrchestrationEvent::PollProgress {
                        job_id,
                        attempt: session.attempt(),
                        progress: session.last_progress(),
                    });
                }
                PollStep::Terminal(report) => {
                    log_terminal(&report);
                    self.events.publish(OrchestrationEvent::PollFinished {
                        report: report.clone(),
                    });
                    return Ok(report);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job_id, attempt = session.attempt(), "Polling stopped");
                    return Err(PollError::Stopped);
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}

fn log_terminal(report: &PollReport) {
    let job_id = report.job_id;
    let attempts = report.attempts;
    match report.outcome.severity() {
        Severity::Success => tracing::info!(job_id, attempts, "Conversion completed"),
        Severity::Warning => tracing::warn!(
            job_id,
            attempts,
            progress = report.progress,
            outcome = ?report.outcome,
            "Conversion still running, giving up",
        ),
        Severity::Error => tracing::error!(
            job_id,
            attempts,
            outcome = ?report.outcome,
            error = report.error_message.as_deref().unwrap_or(""),
            "Conversion polling failed",
        ),
    }
}

/// Handle to a background poll session started by [`StatusPoller::start`].
#[derive(Debug)]
pub struct PollHandle {
    job_id: DbId,
    cancel: CancellationToken,
    task: JoinHandle<Result<PollReport, PollError>>,
}

impl PollHandle {
    pub fn job_id(&self) -> DbId {
        self.job_id
    }

    /// Prevent further status calls. An in-flight call is left to resolve
    /// and its result is discarded; the terminal callback will not run.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<PollReport, PollError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(job_id = self.job_id, error = %e, "Poll task aborted");
                Err(PollError::Stopped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use testdeck_core::conversion::JobStatusResponse;

    use super::*;

    /// Source whose `start_conversion` answers with a fixed error status.
    struct Rejecting(Option<u16>);

    impl JobStatusSource for Rejecting {
        async fn start_conversion(&self, _job_id: DbId) -> Result<(), RemoteError> {
            match self.0 {
                Some(status) => Err(RemoteError::Api {
                    status,
                    body: String::new(),
                }),
                None => Err(RemoteError::Transport("refused".into())),
            }
        }

        async fn fetch_status(&self, _job_id: DbId) -> Result<JobStatusResponse, RemoteError> {
            Err(RemoteError::Transport("refused".into()))
        }
    }

    fn poller(status: Option<u16>) -> StatusPoller<Rejecting> {
        StatusPoller::new(
            Arc::new(Rejecting(status)),
            PollConfig::default(),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn conflict_maps_to_already_running() {
        let err = poller(Some(409)).start_conversion(4).await.unwrap_err();
        assert_matches!(err, PollError::ConversionAlreadyRunning(4));
    }

    #[tokio::test]
    async fn not_found_maps_to_job_not_found() {
        let err = poller(Some(404)).start_conversion(4).await.unwrap_err();
        assert_matches!(err, PollError::JobNotFound(4));
    }

    #[tokio::test]
    async fn other_failures_stay_remote() {
        let err = poller(None).start_conversion(4).await.unwrap_err();
        assert_matches!(err, PollError::Remote(RemoteError::Transport(_)));
    }

    #[test]
    fn registry_rejects_duplicates_until_guard_drops() {
        let poller = poller(None);
        let guard = poller.register(9).unwrap();
        assert!(poller.is_polling(9));
        assert_matches!(poller.register(9), Err(PollError::AlreadyPolling(9)));

        drop(guard);
        assert!(!poller.is_polling(9));
        assert!(poller.register(9).is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let poller = poller(None);
        assert_matches!(poller.poll(1, &cancel).await, Err(PollError::Stopped));
        assert!(!poller.is_polling(1));
    }
}
