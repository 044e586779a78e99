//! # Backoff policy for restarting crashed services.
//!
//! [`BackoffPolicy`] controls how restart delays grow after repeated crashes.
//! It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for restart `n` is computed as `first × factor^n`, clamped to `max`,
//! then jitter is applied. The base is derived purely from the restart counter,
//! so jitter output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(1000),
//!     max: Duration::from_secs(30),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(3), Duration::from_secs(8));
//! // 1s × 2^10 = 1024s → capped at max
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::humantime_serde;
use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    #[serde(with = "humantime_serde")]
    pub first: Duration,
    /// Cap applied before jitter.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to prevent thundering herd.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a strategy with:
    /// - `first = 1s`;
    /// - `max = 30s`;
    /// - `factor = 2.0` (doubling);
    /// - `jitter = Spread { percent: 10 }`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            factor: 2.0,
            jitter: JitterPolicy::default(),
        }
    }
}

impl BackoffPolicy {
    /// Returns the un-jittered delay for the given restart count.
    ///
    /// `first × factor^restarts`, clamped to [`BackoffPolicy::max`]; overflow
    /// and non-finite results also clamp to `max`.
    pub fn base(&self, restarts: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = restarts.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }

    /// Computes the jittered delay to wait before restart number `restarts + 1`.
    pub fn next(&self, restarts: u32) -> Duration {
        self.jitter.apply(self.base(restarts))
    }
}
