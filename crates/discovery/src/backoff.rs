//! Retry schedule for registry lookups.
//!
//! The default policy retries every 5 seconds, forever, without jitter. The
//! exponential variant grows the delay by `multiplier` per consecutive failure
//! up to `max`, optionally randomised by `jitter` and bounded by
//! `max_attempts`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default delay between lookups.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Retry schedule applied by the background refresh task.
///
/// Deserialized values go through the same normalisation as the builder
/// methods, so a configuration file cannot produce an out-of-range policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBackoffPolicy")]
#[must_use]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,

    /// Upper bound for any single delay.
    pub max: Duration,

    /// Growth factor per consecutive failure. `1.0` gives a fixed interval.
    pub multiplier: f64,

    /// Fraction of the delay that may be randomly shaved off, in `[0.0, 1.0]`.
    pub jitter: f64,

    /// Total number of lookups allowed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

/// Wire form of [`BackoffPolicy`] before normalisation.
#[derive(Deserialize)]
struct RawBackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    #[serde(default)]
    max_attempts: Option<u32>,
}

impl From<RawBackoffPolicy> for BackoffPolicy {
    fn from(raw: RawBackoffPolicy) -> Self {
        let policy = Self::exponential(raw.initial, raw.max)
            .with_multiplier(raw.multiplier)
            .with_jitter(raw.jitter);
        match raw.max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_INTERVAL)
    }
}

impl BackoffPolicy {
    /// Same delay after every failure, unbounded attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Doubling delay starting at `initial`, capped at `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Set the growth factor. Values below `1.0` (or not finite) become `1.0`.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    /// Set the jitter fraction, clamped to `[0.0, 1.0]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Bound the total number of lookups.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Returns `true` if another lookup may follow failed lookup number
    /// `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay after failed lookup number `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay after failed lookup number `attempt` (1-based), with jitter
    /// applied: uniformly distributed in `[base * (1 - jitter), base]`.
    ///
    /// Fields set directly to out-of-range values are clamped here as well.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 - rand::rng().random_range(0.0..=jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(base)
            .min(base)
    }
}
