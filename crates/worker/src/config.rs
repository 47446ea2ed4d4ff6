//! Worker configuration read from environment variables.
//!
//! Missing variables fall back to the defaults of the orchestration crate;
//! malformed ones do too, with a warning.

use std::str::FromStr;
use std::time::Duration;

use testdeck_client::api::{DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT};
use testdeck_core::test_result::RemarkLanguage;
use testdeck_orchestration::{CoalescerConfig, OrchestratorConfig, PollConfig};

pub struct WorkerConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    pub poll: PollConfig,
    pub coalescer: CoalescerConfig,
    pub orchestrator: OrchestratorConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);
        let poll_defaults = PollConfig::default();
        let coalescer_defaults = CoalescerConfig::default();

        Self {
            api_url: env
                .text("TESTDECK_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token: env.text("TESTDECK_API_TOKEN"),
            http_timeout: Duration::from_secs(
                env.positive("TESTDECK_HTTP_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT.as_secs()),
            ),
            poll: PollConfig {
                interval: Duration::from_millis(env.positive(
                    "POLL_INTERVAL_MS",
                    poll_defaults.interval.as_millis() as u64,
                )),
                max_attempts: env.positive("POLL_MAX_ATTEMPTS", poll_defaults.max_attempts),
                stall_threshold: env.positive("POLL_STALL_THRESHOLD", poll_defaults.stall_threshold),
                max_retries: env.positive("POLL_MAX_RETRIES", poll_defaults.max_retries),
            },
            coalescer: CoalescerConfig {
                debounce: Duration::from_millis(env.positive(
                    "SAVE_DEBOUNCE_MS",
                    coalescer_defaults.debounce.as_millis() as u64,
                )),
            },
            orchestrator: OrchestratorConfig {
                auto_remark: env.text("AUTO_REMARK_LANG").map(|code| RemarkLanguage::from_code(&code)),
            },
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-blank value of `key`.
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Value of `key` parsed as a number greater than zero.
    fn positive<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    {
        let Some(raw) = self.text(key) else {
            return default;
        };
        match raw.parse::<T>() {
            Ok(value) if value > T::default() => value,
            _ => {
                tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
                default
            }
        }
    }
}
