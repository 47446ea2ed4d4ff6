//! Tunable parameters for the orchestration components.
//!
//! Defaults match the console's behavior: a status poll every 2 seconds for
//! at most 30 polls, stall detection after 5 polls at 0%, 3 consecutive
//! transient errors tolerated, and a 500 ms trailing save debounce.

use std::time::Duration;

use testdeck_core::test_result::RemarkLanguage;

/// Delay between two status polls (also used between retries).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum number of status calls per session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Processing polls after which 0% progress counts as a stall.
pub const DEFAULT_STALL_THRESHOLD: u32 = 5;

/// Consecutive transient errors tolerated before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Quiet period after the last staged edit before a flush.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Status polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub stall_threshold: u32,
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PollConfig {
    /// Upper bound on the wall-clock time a session can spend sleeping.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Write-coalescer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescerConfig {
    pub debounce: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_SAVE_DEBOUNCE,
        }
    }
}

/// Execution-orchestrator parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// When set, executed items get a generated remark in this language.
    pub auto_remark: Option<RemarkLanguage>,
}
