//! Battery readings published by the main loop for the command handlers.
//!
//! Every field is an independent atomic. Readers may see a voltage from one
//! poll and a load current from the next, which the protocol tolerates.

use core::fmt;

use portable_atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, Ordering};

use super::profile::{BREAKPOINT_COUNT, BatteryProfile, Chemistry, percentage};

const TEMPERATURE_UNKNOWN: i32 = i32::MIN;

/// Why a `SET_BATTERY_VOLTAGE_n` request was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BreakpointError {
    /// Breakpoints are fixed by the selected chemistry.
    NotCustom(Chemistry),
    IndexOutOfRange(u8),
    Negative(i32),
}

impl fmt::Display for BreakpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointError::NotCustom(chemistry) => {
                write!(f, "breakpoints are fixed for {chemistry} packs")
            }
            BreakpointError::IndexOutOfRange(index) => write!(f, "no breakpoint {index}"),
            BreakpointError::Negative(value) => write!(f, "negative breakpoint {value} mV"),
        }
    }
}

pub struct BatteryStatus {
    chemistry: AtomicU8,
    breakpoints: [AtomicU32; BREAKPOINT_COUNT],
    instant_mv: AtomicU32,
    average_mv: AtomicU32,
    load_ma: AtomicU32,
    temperature_c: AtomicI32,
    safe_to_power: AtomicBool,
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chemistry: AtomicU8::new(Chemistry::Custom.to_raw()),
            breakpoints: [const { AtomicU32::new(0) }; BREAKPOINT_COUNT],
            instant_mv: AtomicU32::new(0),
            average_mv: AtomicU32::new(0),
            load_ma: AtomicU32::new(0),
            temperature_c: AtomicI32::new(TEMPERATURE_UNKNOWN),
            safe_to_power: AtomicBool::new(false),
        }
    }

    pub fn publish_profile(&self, profile: &BatteryProfile) {
        self.chemistry
            .store(profile.chemistry.to_raw(), Ordering::Relaxed);
        for (slot, value) in self.breakpoints.iter().zip(profile.breakpoints) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    pub fn publish_safety(&self, safe: bool) {
        self.safe_to_power.store(safe, Ordering::Relaxed);
    }

    pub fn publish_readings(&self, instant_mv: u32, average_mv: u32, load_ma: u32) {
        self.instant_mv.store(instant_mv, Ordering::Relaxed);
        self.average_mv.store(average_mv, Ordering::Relaxed);
        self.load_ma.store(load_ma, Ordering::Relaxed);
    }

    pub fn publish_temperature(&self, celsius: Option<i16>) {
        let raw = celsius.map_or(TEMPERATURE_UNKNOWN, i32::from);
        self.temperature_c.store(raw, Ordering::Relaxed);
    }

    /// Overwrites one breakpoint of a host-defined profile.
    pub fn set_breakpoint(&self, index: u8, millivolts: i32) -> Result<(), BreakpointError> {
        let chemistry = self.chemistry();
        if chemistry != Chemistry::Custom {
            return Err(BreakpointError::NotCustom(chemistry));
        }
        let slot = self
            .breakpoints
            .get(usize::from(index))
            .ok_or(BreakpointError::IndexOutOfRange(index))?;
        let value = u32::try_from(millivolts).map_err(|_| BreakpointError::Negative(millivolts))?;
        slot.store(value, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn chemistry(&self) -> Chemistry {
        Chemistry::from_raw(self.chemistry.load(Ordering::Relaxed)).unwrap_or(Chemistry::Custom)
    }

    #[must_use]
    pub fn profile(&self) -> BatteryProfile {
        let mut profile = BatteryProfile::undefined(self.chemistry());
        for (value, slot) in profile.breakpoints.iter_mut().zip(&self.breakpoints) {
            *value = slot.load(Ordering::Relaxed);
        }
        profile
    }

    #[must_use]
    pub fn safe_to_power(&self) -> bool {
        self.safe_to_power.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn instant_mv(&self) -> u32 {
        self.instant_mv.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn average_mv(&self) -> u32 {
        self.average_mv.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn load_ma(&self) -> u32 {
        self.load_ma.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn temperature_c(&self) -> Option<i16> {
        i16::try_from(self.temperature_c.load(Ordering::Relaxed)).ok()
    }

    /// Charge estimate from the long-term average voltage.
    #[must_use]
    pub fn percentage(&self) -> Option<u8> {
        percentage(&self.profile().breakpoints, self.average_mv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_rejected_for_fixed_chemistry() {
        let status = BatteryStatus::new();
        status.publish_profile(&BatteryProfile::for_pack(Chemistry::LiPo, 3));
        assert_eq!(
            status.set_breakpoint(0, 9_000),
            Err(BreakpointError::NotCustom(Chemistry::LiPo))
        );
        assert_eq!(status.profile().breakpoints[0], 10_500);
    }

    #[test]
    fn custom_breakpoints_enable_percentage() {
        let status = BatteryStatus::new();
        status.publish_profile(&BatteryProfile::undefined(Chemistry::Custom));
        status.publish_readings(11_000, 11_000, 0);
        assert_eq!(status.percentage(), None);

        status.set_breakpoint(0, 10_000).expect("custom");
        assert_eq!(status.percentage(), None);
        status.set_breakpoint(6, 12_000).expect("custom");
        assert_eq!(status.percentage(), Some(48));
    }

    #[test]
    fn rejects_bad_breakpoint_requests() {
        let status = BatteryStatus::new();
        assert_eq!(
            status.set_breakpoint(7, 1),
            Err(BreakpointError::IndexOutOfRange(7))
        );
        assert_eq!(
            status.set_breakpoint(2, -4),
            Err(BreakpointError::Negative(-4))
        );
    }

    #[test]
    fn temperature_defaults_to_unknown() {
        let status = BatteryStatus::new();
        assert_eq!(status.temperature_c(), None);
        status.publish_temperature(Some(-3));
        assert_eq!(status.temperature_c(), Some(-3));
    }
}
