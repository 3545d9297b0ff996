#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Embassy clock adapter for the core's [`MonotonicInstant`].

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Duration as EmbassyDuration, Instant};
use energy_core::clock::MonotonicInstant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    /// Boot time, usable in `static` initializers.
    pub const ZERO: Self = Self(Instant::from_ticks(0));

    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn into_inner(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        let sum = self.0.checked_add(EmbassyDuration::from_micros(micros));
        Self(sum.unwrap_or(Instant::MAX))
    }
}

impl MonotonicInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }

    fn as_millis(&self) -> u64 {
        self.0.as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_saturates_at_the_end_of_time() {
        let late = FirmwareInstant::from(Instant::MAX);
        assert_eq!(late + Duration::from_secs(1), late);
    }

    #[test]
    fn elapsed_time_converts_to_core_duration() {
        let start = FirmwareInstant::from(Instant::from_millis(1_000));
        let later = start + Duration::from_millis(2_500);
        assert_eq!(later.saturating_duration_since(start), Duration::from_millis(2_500));
        assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(later.as_millis(), 3_500);
    }
}
