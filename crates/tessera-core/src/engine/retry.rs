//! Retry policy and decider: bounded exponential backoff per activity class.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::ActivityError;

/// Retry policy attached to one activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,

    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_coefficient: f64,

    /// Upper bound for any single delay.
    pub maximum_interval: Duration,

    /// Total attempts allowed, the first one included.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10 * 60),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempts` (1-indexed).
    ///
    /// delay = initial_interval * backoff_coefficient^(attempts - 1), capped at
    /// maximum_interval. With the defaults: 1s, 2s, 4s, ... 600s.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let cap = self.maximum_interval.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.maximum_interval;
        }
        Duration::from_secs_f64(secs)
    }

    /// Attempts actually allowed; a policy never allows fewer than one.
    pub fn attempt_budget(&self) -> u32 {
        self.maximum_attempts.max(1)
    }
}

/// Options for one activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub retry: RetryPolicy,

    /// Limit for a single attempt. An attempt that runs past it counts as a
    /// retryable failure.
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            start_to_close_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry { delay: Duration, reason: String },
    GiveUp { reason: String },
}

impl Decision {
    /// Name stored in the decision record.
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Retry { .. } => "schedule_retry",
            Decision::GiveUp { .. } => "give_up",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Retry { reason, .. } | Decision::GiveUp { reason } => reason,
        }
    }
}

/// Decides the next action after a failed attempt.
///
/// Pure: given the policy, the attempt number and the error, return the next
/// action. Sleeping and recording are left to the caller.
pub trait Decider: Send + Sync {
    fn decide(&self, policy: &RetryPolicy, attempt: u32, error: &ActivityError) -> Decision;
}

/// Retry retryable errors while the attempt budget lasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, policy: &RetryPolicy, attempt: u32, error: &ActivityError) -> Decision {
        let budget = policy.attempt_budget();
        if !error.is_retryable() {
            Decision::GiveUp {
                reason: "non-retryable error".to_string(),
            }
        } else if attempt >= budget {
            Decision::GiveUp {
                reason: format!("max attempts reached: {attempt}/{budget}"),
            }
        } else {
            let delay = policy.next_delay(attempt);
            Decision::Retry {
                delay,
                reason: format!("retry attempt {}/{budget} after {delay:?}", attempt + 1),
            }
        }
    }
}
