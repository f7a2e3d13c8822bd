//! Retry budget and exponential backoff for outbound calls.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::semantics::is_retry_safe;

/// Retry policy for transport-level failures.
///
/// HTTP statuses are never retried; only failures where no response was obtained
/// (connect error, timeout, reset, body read failure) count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (0 => single attempt).
    pub max_retries: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_interval_ms: u64,
    /// Backoff multiplier (typically >= 1.0).
    pub backoff_coefficient: f64,
    /// Optional cap on any single backoff interval, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_interval_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval_ms: 200,
            backoff_coefficient: 2.0,
            maximum_interval_ms: Some(2000),
        }
    }
}

impl RetryPolicy {
    /// Policy with a single attempt and no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts allowed for `method`, including the initial one.
    ///
    /// Methods that are not retry-safe always get exactly one attempt.
    #[must_use]
    pub fn max_attempts_for(&self, method: &Method) -> u32 {
        if is_retry_safe(method) {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based) before the next one.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        retry_delay(self, attempt)
    }
}

/// Exponential backoff: `initial * coeff^(attempt-1)`, capped at `maximum_interval_ms`.
///
/// `attempt` starts at 1 for the initial try; the delay after attempt 1 is the initial interval.
/// Degenerate coefficients (non-finite or <= 0) yield no delay.
#[must_use]
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let coeff = policy.backoff_coefficient;
    if !coeff.is_finite() || coeff <= 0.0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(30);
    let mult = coeff.powi(i32::try_from(exp).unwrap_or(30));
    if !mult.is_finite() || mult <= 0.0 {
        return Duration::ZERO;
    }

    let mut d = Duration::from_millis(policy.initial_interval_ms).mul_f64(mult);
    if let Some(max_ms) = policy.maximum_interval_ms {
        d = d.min(Duration::from_millis(max_ms));
    }
    d
}
