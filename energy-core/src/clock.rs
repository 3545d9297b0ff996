//! Monotonic time abstractions shared by the firmware and host targets.

use core::ops::Add;
use core::time::Duration;

/// Monotonic instant wrapper used by every timed component in the crate.
///
/// Firmware wraps the Embassy clock, the emulator and tests use [`Millis`].
pub trait MonotonicInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;

    /// Milliseconds elapsed since boot, used for blink phase arithmetic.
    fn as_millis(&self) -> u64;
}

/// Millisecond tick counter for hosts without a hardware clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Millis(pub u64);

impl Millis {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl Add<Duration> for Millis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl MonotonicInstant for Millis {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Returns `true` once `now` has reached `deadline`.
#[inline]
#[must_use]
pub fn deadline_reached<I: MonotonicInstant>(now: I, deadline: I) -> bool {
    now >= deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_add_saturates() {
        let late = Millis::new(u64::MAX - 1) + Duration::from_secs(1);
        assert_eq!(late, Millis::new(u64::MAX));
    }

    #[test]
    fn duration_since_never_underflows() {
        let earlier = Millis::new(500);
        let now = Millis::new(200);
        assert_eq!(now.saturating_duration_since(earlier), Duration::ZERO);
        assert_eq!(
            earlier.saturating_duration_since(now),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn deadline_is_inclusive() {
        assert!(deadline_reached(Millis::new(10), Millis::new(10)));
        assert!(!deadline_reached(Millis::new(9), Millis::new(10)));
    }
}
