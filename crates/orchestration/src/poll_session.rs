//! Status-poll state machine.
//!
//! [`PollSession`] holds the bookkeeping of one poll session and computes
//! every transition from the outcome of a status call. It performs no I/O
//! and never sleeps; [`StatusPoller`](crate::poller::StatusPoller) drives
//! it with real (or virtual) time.
//!
//! ```text
//! idle -> polling -> completed | failed        (remote-driven)
//!         polling -> retrying -> polling       (transient error, retries remain)
//!                    retrying -> exhausted     (retries exhausted)
//!         polling -> stalled                   (progress stuck at 0)
//!         polling -> exhausted                 (attempt ceiling reached)
//! ```

use chrono::Utc;
use serde::Serialize;
use testdeck_core::conversion::{ConversionStatus, JobStatusResponse};
use testdeck_core::error::OrchestrationError;
use testdeck_core::remote::RemoteError;
use testdeck_core::types::{DbId, Timestamp};

use crate::config::PollConfig;

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// Current state of a poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Polling,
    /// The last status call failed transiently; the next call is a retry.
    Retrying,
    Completed,
    Failed,
    Stalled,
    Exhausted,
}

/// Why a session ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Too many consecutive transient errors.
    Retries,
    /// The attempt ceiling was reached while the job was still processing.
    Attempts,
}

/// Terminal outcome of a poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    Completed,
    Failed,
    Stalled,
    Exhausted(ExhaustionReason),
}

/// How a terminal outcome should be surfaced to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl PollOutcome {
    pub fn severity(self) -> Severity {
        match self {
            Self::Completed => Severity::Success,
            // The job may still be alive; the user is asked to check back.
            Self::Stalled | Self::Exhausted(ExhaustionReason::Attempts) => Severity::Warning,
            Self::Failed | Self::Exhausted(ExhaustionReason::Retries) => Severity::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Completed
    }

    fn state(self) -> PollState {
        match self {
            Self::Completed => PollState::Completed,
            Self::Failed => PollState::Failed,
            Self::Stalled => PollState::Stalled,
            Self::Exhausted(_) => PollState::Exhausted,
        }
    }
}

/// Result delivered once per session when it reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub job_id: DbId,
    pub outcome: PollOutcome,
    /// Last progress reported by the backend (0-100).
    pub progress: u8,
    /// Remote failure message, or the last transient error when retries ran out.
    pub error_message: Option<String>,
    /// Status calls issued during the session.
    pub attempts: u32,
    /// Transient errors in a row at the end of the session.
    pub consecutive_errors: u32,
    pub started_at: Timestamp,
}

impl PollReport {
    /// Map a non-success outcome onto the orchestration error taxonomy.
    pub fn into_error(self) -> Option<OrchestrationError> {
        let job_id = self.job_id;
        match self.outcome {
            PollOutcome::Completed => None,
            PollOutcome::Failed => Some(OrchestrationError::RemoteJobFailed {
                job_id,
                message: self
                    .error_message
                    .unwrap_or_else(|| "conversion failed".to_string()),
            }),
            PollOutcome::Stalled => Some(OrchestrationError::StallTimeout {
                job_id,
                attempts: self.attempts,
            }),
            PollOutcome::Exhausted(ExhaustionReason::Retries) => {
                Some(OrchestrationError::ExhaustedRetries {
                    job_id,
                    retries: self.consecutive_errors,
                })
            }
            PollOutcome::Exhausted(ExhaustionReason::Attempts) => {
                Some(OrchestrationError::ExhaustedAttempts {
                    job_id,
                    attempts: self.attempts,
                })
            }
        }
    }
}

/// What the driver should do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Sleep one interval and poll again.
    Continue,
    /// Stop; deliver the report.
    Terminal(PollReport),
}

// ---------------------------------------------------------------------------
// PollSession
// ---------------------------------------------------------------------------

/// Bookkeeping of one poll session.
#[derive(Debug, Clone)]
pub struct PollSession {
    job_id: DbId,
    max_attempts: u32,
    stall_threshold: u32,
    max_retries: u32,
    /// Status calls issued so far, successful or not.
    attempt: u32,
    consecutive_transient_errors: u32,
    /// Responses with status `processing` (or `none`).
    processing_polls: u32,
    last_progress: u8,
    last_error: Option<String>,
    state: PollState,
    outcome: Option<PollOutcome>,
    started_at: Timestamp,
}

impl PollSession {
    pub fn new(job_id: DbId, config: &PollConfig) -> Self {
        Self {
            job_id,
            max_attempts: config.max_attempts.max(1),
            stall_threshold: config.stall_threshold,
            max_retries: config.max_retries.max(1),
            attempt: 0,
            consecutive_transient_errors: 0,
            processing_polls: 0,
            last_progress: 0,
            last_error: None,
            state: PollState::Idle,
            outcome: None,
            started_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> DbId {
        self.job_id
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn consecutive_transient_errors(&self) -> u32 {
        self.consecutive_transient_errors
    }

    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }

    /// Move from `idle` to `polling`. Has no effect once started.
    pub fn begin(&mut self) {
        if self.state == PollState::Idle {
            self.state = PollState::Polling;
        }
    }

    /// Feed the result of one status call and compute the next step.
    ///
    /// Once terminal, further observations are ignored and the same report
    /// is returned.
    pub fn observe(&mut self, result: Result<JobStatusResponse, RemoteError>) -> PollStep {
        if let Some(outcome) = self.outcome {
            return PollStep::Terminal(self.report(outcome));
        }
        self.begin();
        self.attempt += 1;

        match result {
            Ok(status) => self.observe_status(status),
            Err(err) => self.observe_error(err),
        }
    }

    fn observe_status(&mut self, status: JobStatusResponse) -> PollStep {
        self.consecutive_transient_errors = 0;
        self.last_progress = status.progress();

        match status.status {
            ConversionStatus::Completed => self.finish(PollOutcome::Completed),
            ConversionStatus::Failed => {
                self.last_error = status.error_message;
                self.finish(PollOutcome::Failed)
            }
            ConversionStatus::Processing | ConversionStatus::None => {
                self.processing_polls += 1;
                if self.processing_polls >= self.stall_threshold && self.last_progress == 0 {
                    self.finish(PollOutcome::Stalled)
                } else if self.attempt >= self.max_attempts {
                    self.finish(PollOutcome::Exhausted(ExhaustionReason::Attempts))
                } else {
                    self.state = PollState::Polling;
                    PollStep::Continue
                }
            }
        }
    }

    fn observe_error(&mut self, err: RemoteError) -> PollStep {
        self.consecutive_transient_errors += 1;
        self.last_error = Some(err.to_string());

        if self.consecutive_transient_errors >= self.max_retries {
            self.finish(PollOutcome::Exhausted(ExhaustionReason::Retries))
        } else if self.attempt >= self.max_attempts {
            self.finish(PollOutcome::Exhausted(ExhaustionReason::Attempts))
        } else {
            self.state = PollState::Retrying;
            PollStep::Continue
        }
    }

    fn finish(&mut self, outcome: PollOutcome) -> PollStep {
        self.state = outcome.state();
        self.outcome = Some(outcome);
        PollStep::Terminal(self.report(outcome))
    }

    fn report(&self, outcome: PollOutcome) -> PollReport {
        let error_message = match outcome {
            PollOutcome::Failed | PollOutcome::Exhausted(ExhaustionReason::Retries) => {
                self.last_error.clone()
            }
            _ => None,
        };
        PollReport {
            job_id: self.job_id,
            outcome,
            progress: self.last_progress,
            error_message,
            attempts: self.attempt,
            consecutive_errors: self.consecutive_transient_errors,
            started_at: self.started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
