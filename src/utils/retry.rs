//! Retry utilities: backoff for transient participant transport failures.
//!
//! Uses `backon` for exponential backoff with jitter. Retries happen inside
//! a participant's unit of work, below the point where its outcome is
//! written to the operation context.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::CoordinatorConfig;

/// Maximum delay between transient retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Backoff for transient transport failures within one phase.
///
/// - Min delay: `retry_min_delay_ms`
/// - Max delay: 1s
/// - Max attempts: `transient_retries` (0 = single attempt)
/// - Jitter enabled
pub fn transient_backoff(config: &CoordinatorConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.retry_min_delay())
        .with_max_delay(MAX_RETRY_DELAY.max(config.retry_min_delay()))
        .with_max_times(config.transient_retries)
        .with_jitter()
}
