use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::errors::Error;

/// Strategy for adding randomness to delay calculations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    #[default]
    None,
    Full,
    Decorrelated,
}

impl JitterStrategy {
    /// Scales `delay` by a random factor; the result never exceeds `cap`.
    pub fn apply(&self, delay: Duration, cap: Duration, rng: &mut impl Rng) -> Duration {
        let factor = match self {
            JitterStrategy::None => return delay,
            JitterStrategy::Full => rng.gen_range(0.0..1.0),
            JitterStrategy::Decorrelated => rng.gen_range(0.5..1.5),
        };
        delay.mul_f64(factor).min(cap)
    }
}

impl FromStr for JitterStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(JitterStrategy::None),
            "full" => Ok(JitterStrategy::Full),
            "decorrelated" => Ok(JitterStrategy::Decorrelated),
            other => Err(Error::Config(format!(
                "Unknown jitter strategy '{}'; expected 'none', 'full' or 'decorrelated'",
                other
            ))),
        }
    }
}

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// `attempt` counts failures: it is 1 right after the first failed attempt.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    #[default]
    Disabled,
    Constant {
        count: u32,
        delay: Duration,
    },
    Exponential {
        count: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn constant(count: u32, delay: Duration) -> Self {
        RetryPolicy::Constant { count, delay }
    }

    pub fn exponential(
        count: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, Error> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config(format!(
                "Retry multiplier must be a finite value >= 1.0, got {multiplier}"
            )));
        }
        if initial_delay > max_delay {
            return Err(Error::Config(
                "Initial retry delay must not exceed the maximum delay".into(),
            ));
        }
        Ok(RetryPolicy::Exponential {
            count,
            initial_delay,
            multiplier,
            max_delay,
        })
    }

    pub fn count(&self) -> u32 {
        match self {
            RetryPolicy::Disabled => 0,
            RetryPolicy::Constant { count, .. } | RetryPolicy::Exponential { count, .. } => *count,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.count()
    }

    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        match self {
            RetryPolicy::Disabled => None,
            RetryPolicy::Constant { delay, .. } => Some(*delay),
            RetryPolicy::Exponential {
                initial_delay,
                multiplier,
                max_delay,
                ..
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                let delay = if secs.is_finite() && secs >= 0.0 {
                    Duration::try_from_secs_f64(secs).unwrap_or(*max_delay)
                } else {
                    *max_delay
                };
                Some(delay.min(*max_delay))
            }
        }
    }

    /// Upper bound a jittered delay is clamped to.
    pub fn max_delay(&self) -> Duration {
        match self {
            RetryPolicy::Disabled => Duration::ZERO,
            RetryPolicy::Constant { delay, .. } => delay.saturating_mul(2),
            RetryPolicy::Exponential { max_delay, .. } => *max_delay,
        }
    }
}
