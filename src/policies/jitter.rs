//! # Jitter policy for restart delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that many services
//! crashing together do not all come back at the same instant.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable delays
//! - [`JitterPolicy::Full`]: random delay in [0, delay]
//! - [`JitterPolicy::Equal`]: delay/2 + random[0, delay/2]
//! - [`JitterPolicy::Spread`]: delay × uniform[1 − p, 1 + p] (orchestrator default, p = 10%)

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy controlling randomization of restart delays.
///
/// ## Trade-offs
/// - **None**: Predictable, but risks thundering herd
/// - **Full**: Maximum randomness, can collapse the delay to zero
/// - **Equal**: Keeps at least half of the delay
/// - **Spread**: Keeps the delay within a narrow symmetric band
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JitterPolicy {
    /// No jitter: use exact backoff delay.
    None,

    /// Full jitter: random delay in [0, delay].
    Full,

    /// Equal jitter: delay = delay/2 + random[0, delay/2].
    Equal,

    /// Symmetric jitter: delay multiplied by a factor drawn uniformly from
    /// `[1 - percent/100, 1 + percent/100]`.
    ///
    /// `percent` is clamped to 100.
    Spread {
        /// Half-width of the band, in percent of the delay.
        percent: u8,
    },
}

impl Default for JitterPolicy {
    /// Returns `Spread { percent: 10 }`, i.e. a factor in [0.9, 1.1].
    fn default() -> Self {
        JitterPolicy::Spread { percent: 10 }
    }
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => self.full_jitter(delay),
            JitterPolicy::Equal => self.equal_jitter(delay),
            JitterPolicy::Spread { percent } => self.spread_jitter(delay, *percent),
        }
    }

    /// Returns the `[low, high]` multiplier band this policy can produce.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            JitterPolicy::None => (1.0, 1.0),
            JitterPolicy::Full => (0.0, 1.0),
            JitterPolicy::Equal => (0.5, 1.0),
            JitterPolicy::Spread { percent } => {
                let p = f64::from((*percent).min(100)) / 100.0;
                (1.0 - p, 1.0 + p)
            }
        }
    }

    /// Full jitter: random[0, delay]
    fn full_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(0..=ms))
    }

    /// Equal jitter: delay/2 + random[0, delay/2]
    fn equal_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let half = ms / 2;
        let jitter = if half == 0 {
            0
        } else {
            rng.random_range(0..=half)
        };
        Duration::from_millis(half + jitter)
    }

    /// Spread jitter: delay × uniform[1 - p, 1 + p]
    fn spread_jitter(&self, delay: Duration, percent: u8) -> Duration {
        if percent == 0 || delay.is_zero() {
            return delay;
        }
        let (low, high) = self.bounds();
        let factor = rand::rng().random_range(low..=high);
        delay.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_stays_within_ten_percent() {
        let jitter = JitterPolicy::default();
        let base = Duration::from_millis(1000);
        for _ in 0..500 {
            let d = jitter.apply(base);
            assert!(d >= Duration::from_millis(900), "{d:?} below band");
            assert!(d <= Duration::from_millis(1100), "{d:?} above band");
        }
    }

    #[test]
    fn spread_zero_is_identity() {
        let jitter = JitterPolicy::Spread { percent: 0 };
        assert_eq!(jitter.apply(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn full_and_equal_bounds() {
        let base = Duration::from_millis(800);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(base) <= base);
            let eq = JitterPolicy::Equal.apply(base);
            assert!(eq >= Duration::from_millis(400) && eq <= base);
        }
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn spread_percent_is_clamped() {
        let (low, high) = JitterPolicy::Spread { percent: 250 }.bounds();
        assert_eq!(low, 0.0);
        assert_eq!(high, 2.0);
    }
}
