//! Retry policy and the full-jitter backoff schedule.
//!
//! The schedule works on *ceilings*: before retry `n` the sender sleeps a
//! uniformly random duration in `[0, ceiling_n]`, where
//!
//! ```text
//! ceiling_1 = min(initial_backoff, max_backoff)
//! ceiling_n = min(ceiling_{n-1} * multiplier, max_backoff)
//! ```
//!
//! Ceilings are therefore non-decreasing and never exceed `max_backoff`.

use crate::error::ConfigError;
use rand::Rng;
use std::time::Duration;

/// Immutable retry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// Requires `max_attempts >= 1`, `max_backoff >= initial_backoff` and a
    /// finite `backoff_multiplier >= 1`.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::out_of_range(
                "max_attempts",
                "must be at least 1",
            ));
        }
        if max_backoff < initial_backoff {
            return Err(ConfigError::out_of_range(
                "max_backoff",
                format!(
                    "{:?} is smaller than initial_backoff {:?}",
                    max_backoff, initial_backoff
                ),
            ));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::out_of_range(
                "backoff_multiplier",
                format!("{} is not a finite value >= 1", backoff_multiplier),
            ));
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        })
    }

    /// A single attempt, no retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Returns a copy with a different attempt budget, validated.
    pub fn with_max_attempts(self, max_attempts: u32) -> Result<Self, ConfigError> {
        Self::new(
            max_attempts,
            self.initial_backoff,
            self.max_backoff,
            self.backoff_multiplier,
        )
    }

    /// Iterator over backoff ceilings, one per retry.
    ///
    /// Unbounded; the caller stops after `max_attempts - 1` retries.
    pub fn backoff_ceilings(&self) -> BackoffCeilings {
        BackoffCeilings {
            next: self.initial_backoff,
            max: self.max_backoff,
            multiplier: self.backoff_multiplier,
        }
    }
}

/// See [`RetryPolicy::backoff_ceilings`].
#[derive(Debug, Clone)]
pub struct BackoffCeilings {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Iterator for BackoffCeilings {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let ceiling = self.next.min(self.max);
        self.next = Duration::try_from_secs_f64(ceiling.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max)
            .max(ceiling);
        Some(ceiling)
    }
}

/// Uniformly random duration in `[0, ceiling]`.
pub fn full_jitter(ceiling: Duration) -> Duration {
    let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
}
