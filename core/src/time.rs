//! Monotonic timestamps, mirroring `s2n-quic-core::time::Timestamp`'s
//! opaque-value contract but backed directly by [`std::time::Instant`]
//! since this crate is std-only.

use core::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// An absolute point in time. Only meaningfully compared against other
/// `Timestamp`s sourced from the same [`Clock`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Timestamp(Instant);

impl Timestamp {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn has_elapsed(self, duration: Duration) -> bool {
        Timestamp::now().saturating_duration_since(self) >= duration
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 - rhs)
    }
}

/// A source of [`Timestamp`]s, so tests can substitute a controllable
/// clock instead of real wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
