//! Backoff policy between a failed attempt and its retry

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::duration_millis;

/// Shape of the backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles with every failed attempt
    Exponential,
}

impl std::str::FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff type: {other}")),
        }
    }
}

/// Delay policy applied between a failed attempt and its retry
///
/// The delay is computed from the number of attempts made so far,
/// counting the attempt that just failed:
///
/// ```
/// use cvforge_jobs::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential(Duration::from_secs(2));
///
/// assert_eq!(policy.delay_for(1), Duration::from_secs(2)); // first retry
/// assert_eq!(policy.delay_for(2), Duration::from_secs(4));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Curve type
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(2))
    }
}

impl BackoffPolicy {
    /// Exponential backoff starting at `base_delay`
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay,
        }
    }

    /// Constant delay between retries
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay: delay,
        }
    }

    /// Delay before the next attempt, given the attempts made so far
    ///
    /// `attempts_made` is 1-based and includes the failed attempt; zero is
    /// treated as one.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                // 2^31 is the largest power that fits the multiplier
                let exponent = attempts_made.max(1).saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Apply symmetric random jitter to a delay
///
/// A factor of 0.1 means ±10%. Used for reconnect loops, never for job
/// retries whose delays must be deterministic.
pub fn jittered(delay: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || delay.is_zero() {
        return delay;
    }

    let secs = delay.as_secs_f64();
    let range = secs * factor;
    let offset = rand::thread_rng().gen_range(-range..range);
    Duration::from_secs_f64((secs + offset).max(0.0))
}
