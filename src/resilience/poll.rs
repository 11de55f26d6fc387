//! # Poll/Retry Primitive
//!
//! One executor for every "wait, ask the tool, maybe ask again" loop of the
//! pipeline. Each invocation is preceded by the policy's delay; the check decides
//! whether the observed value is final ([`Attempt::Done`]) or whether polling
//! should continue ([`Attempt::Continue`]), optionally overriding the delay of the
//! next iteration. A check that errors is treated as a transient failure and
//! consumes an attempt.
//!
//! The loop is strictly sequential and runs inside an already detached worker,
//! so a plain `tokio::time::sleep` between attempts is all the scheduling needed.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::constants::polling;

/// Delay and attempt bound for one call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before each attempt unless overridden
    pub interval: Duration,
    /// Maximum number of check invocations
    pub max_attempts: u32,
    /// Smallest accepted override delay
    pub min_override: Duration,
    /// Largest accepted override delay
    pub max_override: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            min_override: polling::MIN_ETA,
            max_override: polling::MAX_ETA,
        }
    }

    /// Bound the delays a check may request through [`Attempt::Continue`]
    pub fn with_override_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_override = min;
        self.max_override = max.max(min);
        self
    }

    /// Clamp a requested override into the policy's bounds
    pub fn clamp_override(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_override, self.max_override)
    }

    /// Policy for unpack and scan polling, derived from the payload size
    pub fn for_payload(size_bytes: u64, config: &PollingConfig) -> Self {
        Self::new(payload_poll_interval(size_bytes, config), config.max_attempts)
            .with_override_bounds(polling::MIN_ETA, config.max_eta())
    }

    /// Policy for repeated trigger calls (scan and report)
    pub fn for_trigger(config: &PollingConfig) -> Self {
        Self::new(config.trigger_interval(), config.max_attempts)
    }

    /// Policy for report polling
    pub fn for_report(config: &PollingConfig) -> Self {
        Self::new(config.report_interval(), config.max_attempts)
    }
}

/// Poll interval for a payload of the given size
///
/// Small payloads poll at a fixed interval, larger ones at
/// `seconds_per_megabyte * size_mb` seconds.
pub fn payload_poll_interval(size_bytes: u64, config: &PollingConfig) -> Duration {
    if size_bytes <= config.small_payload_threshold_bytes {
        return Duration::from_secs(config.small_payload_interval_seconds);
    }

    let megabytes = size_bytes / polling::BYTES_PER_MEGABYTE;
    Duration::from_secs(megabytes.saturating_mul(config.seconds_per_megabyte))
}

/// What a single check observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Final value, stop polling
    Done(T),
    /// Keep polling; `retry_after` overrides the next delay
    Continue {
        value: T,
        retry_after: Option<Duration>,
    },
}

impl<T> Attempt<T> {
    pub fn pending(value: T) -> Self {
        Self::Continue {
            value,
            retry_after: None,
        }
    }
}

/// Result of a whole polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Settled {
        value: T,
        attempts: u32,
    },
    /// Attempt bound reached without a final value
    Exhausted {
        last: Option<T>,
        attempts: u32,
        last_error: Option<String>,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Settled { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `check` until it reports [`Attempt::Done`] or the policy's bound is reached
///
/// `check` receives the 1-based attempt number.
pub async fn poll_with_retry<T, E, F, Fut>(
    operation: &str,
    policy: &PollPolicy,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Attempt<T>, E>>,
    E: Display,
{
    let mut delay = policy.interval;
    let mut last = None;
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        sleep(delay).await;

        match check(attempt).await {
            Ok(Attempt::Done(value)) => {
                debug!(operation, attempt, "Poll settled");
                return PollOutcome::Settled {
                    value,
                    attempts: attempt,
                };
            }
            Ok(Attempt::Continue { value, retry_after }) => {
                delay = match retry_after {
                    Some(requested) => policy.clamp_override(requested),
                    None => policy.interval,
                };
                debug!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    next_delay_secs = delay.as_secs(),
                    "Poll still pending"
                );
                last = Some(value);
            }
            Err(e) => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Transient polling failure"
                );
                last_error = Some(e.to_string());
                delay = policy.interval;
            }
        }
    }

    PollOutcome::Exhausted {
        last,
        attempts: policy.max_attempts,
        last_error,
    }
}
