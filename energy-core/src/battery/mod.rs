//! Battery monitoring pipeline.
//!
//! [`BatteryMonitor`] owns the analog front end and the filter state. It is
//! driven exclusively from the main loop: [`BatteryMonitor::initialize`] once
//! at boot, then [`BatteryMonitor::poll`] every
//! [`BATTERY_POLL_PERIOD`](crate::config::BATTERY_POLL_PERIOD). Results are
//! published into a shared [`BatteryStatus`] that the command handlers read.

pub mod calibration;
pub mod filter;
pub mod profile;
pub mod status;
pub mod temperature;

use crate::config::BoardRevision;

use self::calibration::{CALIBRATION_REFERENCE_MV, CalibrationStore};
use self::filter::{DualRateFilter, InstantFilter, to_fixed};
use self::profile::{BatteryProfile, Chemistry, find_cell_count};
pub use self::status::{BatteryStatus, BreakpointError};
use self::temperature::TemperatureModel;

/// Highest 12-bit ADC count.
pub const ADC_FULL_SCALE: u16 = 4095;

/// ADC reference voltage.
pub const ADC_REFERENCE_MV: u32 = 3_300;

/// Conversions averaged per reading.
pub const OVERSAMPLE_COUNT: u32 = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnalogChannel {
    BatteryVoltage,
    LoadCurrent,
    Thermistor,
}

/// Hardware seam for the analog inputs and the chemistry selector.
pub trait AnalogFrontEnd {
    /// Performs one blocking 12-bit conversion.
    fn read(&mut self, channel: AnalogChannel) -> u16;

    /// Samples the chemistry selector inputs.
    fn chemistry_selector(&mut self) -> Chemistry;

    /// Turns the thermistor sense pin into an analog input and waits for it
    /// to settle.
    fn release_thermistor(&mut self) {}

    /// Drives the thermistor sense pin low so it does not self-heat.
    fn park_thermistor(&mut self) {}
}

/// Outcome of the boot-time battery check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatteryInit {
    pub chemistry: Chemistry,
    pub cells: Option<u8>,
    pub voltage_mv: u32,
    /// `false` when a fixed-chemistry pack matched no supported cell count.
    pub safe_to_power: bool,
}

pub struct BatteryMonitor<A> {
    frontend: A,
    calibration: u16,
    current_sense_ohms: u32,
    has_thermistor: bool,
    temperature_model: TemperatureModel,
    voltage: DualRateFilter,
    current: InstantFilter,
}

impl<A> BatteryMonitor<A>
where
    A: AnalogFrontEnd,
{
    /// `calibration` is the raw count at 24 V, already resolved against the default.
    #[must_use]
    pub fn new(frontend: A, board: &BoardRevision, calibration: u16) -> Self {
        Self {
            frontend,
            calibration: calibration.max(1),
            current_sense_ohms: board.current_sense_ohms.max(1),
            has_thermistor: board.has_thermistor,
            temperature_model: TemperatureModel::default(),
            voltage: DualRateFilter::default(),
            current: InstantFilter::default(),
        }
    }

    #[must_use]
    pub fn with_temperature_model(mut self, model: TemperatureModel) -> Self {
        self.temperature_model = model;
        self
    }

    /// Seeds the filters, reads the selector and derives the pack profile.
    pub fn initialize(&mut self, status: &BatteryStatus) -> BatteryInit {
        self.voltage = DualRateFilter::seeded(self.read_voltage_fixed());
        self.current = InstantFilter::seeded(self.read_current_fixed());

        let chemistry = self.frontend.chemistry_selector();
        let voltage_mv = self.voltage.average();

        let (profile, cells, safe_to_power) = match chemistry.cell_table() {
            Some(table) => match find_cell_count(voltage_mv, table[0], table[6]) {
                Some(cells) => (BatteryProfile::for_pack(chemistry, cells), Some(cells), true),
                None => (BatteryProfile::undefined(chemistry), None, false),
            },
            None => (BatteryProfile::undefined(chemistry), None, true),
        };

        status.publish_profile(&profile);
        status.publish_safety(safe_to_power);
        self.publish(status);

        BatteryInit {
            chemistry,
            cells,
            voltage_mv,
            safe_to_power,
        }
    }

    /// Takes one voltage and current reading through both filter stages.
    pub fn poll(&mut self, status: &BatteryStatus) {
        let voltage = self.read_voltage_fixed();
        let current = self.read_current_fixed();
        self.voltage.update(voltage);
        self.current.update(current);
        self.publish(status);
    }

    /// Reads the thermistor and publishes the result.
    pub fn sample_temperature(&mut self, status: &BatteryStatus) -> Option<i16> {
        let celsius = if self.has_thermistor {
            self.frontend.release_thermistor();
            let counts = self.oversample(AnalogChannel::Thermistor);
            self.frontend.park_thermistor();
            self.temperature_model.celsius(counts)
        } else {
            None
        };
        status.publish_temperature(celsius);
        celsius
    }

    /// Records the current raw battery count as the 24 V reference.
    ///
    /// Call only with exactly 24 V applied to the battery input.
    pub fn calibrate<S>(&mut self, store: &mut S) -> Result<u16, S::Error>
    where
        S: CalibrationStore + ?Sized,
    {
        let counts = self.oversample(AnalogChannel::BatteryVoltage);
        store.write(counts)?;
        self.calibration = counts.max(1);
        Ok(counts)
    }

    #[must_use]
    pub fn calibration(&self) -> u16 {
        self.calibration
    }

    #[must_use]
    pub fn instant_mv(&self) -> u32 {
        self.voltage.instant()
    }

    #[must_use]
    pub fn average_mv(&self) -> u32 {
        self.voltage.average()
    }

    #[must_use]
    pub fn load_ma(&self) -> u32 {
        self.current.value()
    }

    pub fn frontend_mut(&mut self) -> &mut A {
        &mut self.frontend
    }

    fn publish(&self, status: &BatteryStatus) {
        status.publish_readings(self.instant_mv(), self.average_mv(), self.load_ma());
    }

    fn oversample(&mut self, channel: AnalogChannel) -> u16 {
        let total: u32 = (0..OVERSAMPLE_COUNT)
            .map(|_| u32::from(self.frontend.read(channel)))
            .sum();
        u16::try_from(total / OVERSAMPLE_COUNT).unwrap_or(u16::MAX)
    }

    fn read_voltage_fixed(&mut self) -> u32 {
        let counts = self.oversample(AnalogChannel::BatteryVoltage);
        counts_to_millivolts_fixed(counts, self.calibration)
    }

    fn read_current_fixed(&mut self) -> u32 {
        let counts = self.oversample(AnalogChannel::LoadCurrent);
        counts_to_milliamps_fixed(counts, self.current_sense_ohms)
    }
}

/// Battery voltage in fixed point from a raw count and the 24 V calibration count.
#[must_use]
pub fn counts_to_millivolts_fixed(counts: u16, calibration: u16) -> u32 {
    let scaled = u64::from(to_fixed(u32::from(counts))) * u64::from(CALIBRATION_REFERENCE_MV)
        / u64::from(calibration.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Load current in fixed point, in two steps so the intermediate stays in 32 bits.
#[must_use]
pub fn counts_to_milliamps_fixed(counts: u16, sense_ohms: u32) -> u32 {
    let divider = u32::from(ADC_FULL_SCALE) * sense_ohms.max(1);
    let coarse = u32::from(counts) * (ADC_REFERENCE_MV * 100) / divider;
    to_fixed(coarse * 100)
}

/// Inverse of [`counts_to_millivolts_fixed`], for simulated front ends.
#[must_use]
pub fn millivolts_to_counts(millivolts: u32, calibration: u16) -> u16 {
    let counts = u64::from(millivolts) * u64::from(calibration) / u64::from(CALIBRATION_REFERENCE_MV);
    u16::try_from(counts.min(u64::from(ADC_FULL_SCALE))).unwrap_or(ADC_FULL_SCALE)
}
