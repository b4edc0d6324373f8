//! Coordinator timing and retry configuration.

use std::time::Duration;

use serde::Deserialize;

use super::cli::CliConfig;

/// Timing and retry settings for phase dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Overall deadline for one phase barrier, in milliseconds.
    pub phase_deadline_ms: u64,
    /// Per-participant call timeout, in milliseconds. Capped by the time left
    /// before the phase deadline.
    pub participant_timeout_ms: u64,
    /// Retries of a transient transport failure within one phase.
    pub transient_retries: usize,
    /// Initial backoff between transient retries, in milliseconds.
    pub retry_min_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            phase_deadline_ms: 30_000,
            participant_timeout_ms: 5_000,
            transient_retries: 1,
            retry_min_delay_ms: 50,
        }
    }
}

impl CoordinatorConfig {
    /// Adopt the CLI connection timeout as the per-participant timeout.
    pub fn with_cli(mut self, cli: &CliConfig) -> Self {
        self.participant_timeout_ms = cli.connection_timeout;
        self
    }

    pub fn phase_deadline(&self) -> Duration {
        Duration::from_millis(self.phase_deadline_ms)
    }

    pub fn participant_timeout(&self) -> Duration {
        Duration::from_millis(self.participant_timeout_ms)
    }

    pub fn retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.retry_min_delay_ms)
    }
}
