//! Explicit retry bounds for the self-healing loop.
//!
//! Every retry count and delay lives here so tests can shrink the sleeps and
//! the failure-clustering threshold stays visible instead of being a magic
//! number inside the loop.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Full workflow attempts, including the first.
    pub max_workflow_attempts: u32,
    /// Attempts per step within one workflow attempt.
    pub max_step_attempts: u32,
    /// Distinct failed steps in one attempt that abort it.
    pub step_failure_threshold: u32,
    /// Timeout injected onto every step before dispatch.
    pub step_timeout_ms: u64,
    /// Fixed backoff between step attempts.
    pub step_retry_delay: Duration,
    /// Settle delay between consecutive steps.
    pub inter_step_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_workflow_attempts: 3,
            max_step_attempts: 3,
            step_failure_threshold: 2,
            step_timeout_ms: 300_000,
            step_retry_delay: Duration::from_secs(5),
            inter_step_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Same bounds, millisecond delays. For tests.
    pub fn fast() -> Self {
        Self {
            step_retry_delay: Duration::from_millis(1),
            inter_step_delay: Duration::from_millis(1),
            ..Self::default()
        }
    }
}
