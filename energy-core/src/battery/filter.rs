//! Fixed-point exponential smoothing.

/// Extra fractional bits carried by every filtered quantity.
pub const FRACTION_BITS: u32 = 5;

/// Old/new weighting for one exponential stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Weights {
    pub history: u32,
    pub sample: u32,
}

impl Weights {
    #[must_use]
    pub const fn new(history: u32, sample: u32) -> Self {
        Self { history, sample }
    }

    #[must_use]
    pub const fn total(self) -> u32 {
        self.history + self.sample
    }

    /// Blends `sample` into `history`, truncating like the integer hardware path.
    #[must_use]
    pub fn blend(self, history: u32, sample: u32) -> u32 {
        let mixed = u64::from(history) * u64::from(self.history)
            + u64::from(sample) * u64::from(self.sample);
        u32::try_from(mixed / u64::from(self.total())).unwrap_or(u32::MAX)
    }
}

/// About 0.1 s time constant at a 5 ms poll period.
pub const SHORT_TERM: Weights = Weights::new(95, 5);

/// About 5 s time constant at a 5 ms poll period.
pub const LONG_TERM: Weights = Weights::new(999, 1);

/// Converts a whole value to fixed point.
#[must_use]
pub const fn to_fixed(value: u32) -> u32 {
    value << FRACTION_BITS
}

/// Truncates a fixed-point value back to whole units.
#[must_use]
pub const fn from_fixed(value: u32) -> u32 {
    value >> FRACTION_BITS
}

/// Short-term "instant" stage feeding a long-term "average" stage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DualRateFilter {
    instant: u32,
    average: u32,
}

impl DualRateFilter {
    /// Starts both stages at the same fixed-point reading.
    #[must_use]
    pub const fn seeded(fixed: u32) -> Self {
        Self {
            instant: fixed,
            average: fixed,
        }
    }

    /// Feeds one fixed-point reading through both stages.
    pub fn update(&mut self, fixed: u32) {
        self.instant = SHORT_TERM.blend(self.instant, fixed);
        self.average = LONG_TERM.blend(self.average, self.instant);
    }

    #[must_use]
    pub const fn instant(&self) -> u32 {
        from_fixed(self.instant)
    }

    #[must_use]
    pub const fn average(&self) -> u32 {
        from_fixed(self.average)
    }
}

/// Single short-term stage, used for load current.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InstantFilter {
    value: u32,
}

impl InstantFilter {
    #[must_use]
    pub const fn seeded(fixed: u32) -> Self {
        Self { value: fixed }
    }

    pub fn update(&mut self, fixed: u32) {
        self.value = SHORT_TERM.blend(self.value, fixed);
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        from_fixed(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_input_is_a_fixed_point() {
        let mut filter = DualRateFilter::seeded(to_fixed(12_000));
        for _ in 0..1_000 {
            filter.update(to_fixed(12_000));
        }
        assert_eq!(filter.instant(), 12_000);
        assert_eq!(filter.average(), 12_000);
    }

    #[test]
    fn instant_tracks_a_step_within_a_second() {
        let mut filter = DualRateFilter::seeded(to_fixed(10_000));
        for _ in 0..200 {
            filter.update(to_fixed(11_000));
        }
        assert!(filter.instant().abs_diff(11_000) <= 1);
        assert!(filter.average() < 10_300);
    }

    #[test]
    fn average_lags_behind_instant() {
        let mut filter = DualRateFilter::seeded(to_fixed(10_000));
        for _ in 0..100 {
            filter.update(to_fixed(9_000));
        }
        assert!(filter.instant() < filter.average());
    }

    #[test]
    fn blend_uses_integer_truncation() {
        assert_eq!(SHORT_TERM.blend(100, 101), 100);
        assert_eq!(SHORT_TERM.blend(0, 100), 5);
    }
}
