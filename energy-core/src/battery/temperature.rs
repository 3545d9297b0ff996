//! NTC thermistor conversion (10 kΩ at 25 °C, β = 3380, 10 kΩ pull-up).

use super::ADC_FULL_SCALE;

const NOMINAL_OHMS: f32 = 10_000.0;
const BETA: f32 = 3_380.0;
const NOMINAL_KELVIN: f32 = 273.15 + 25.0;
const KELVIN_OFFSET: f32 = 273.15;

/// Conversion used to answer temperature queries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TemperatureModel {
    /// Integer linear fit, 1 °C resolution, valid from about -5 to 40 °C.
    #[default]
    Linear,
    /// Closed-form β equation over the full range.
    Beta,
}

impl TemperatureModel {
    /// Converts an averaged ADC reading to whole degrees Celsius.
    #[must_use]
    pub fn celsius(self, counts: u16) -> Option<i16> {
        match self {
            TemperatureModel::Linear => Some(linear_celsius(counts)),
            TemperatureModel::Beta => beta_celsius(counts).map(round_to_i16),
        }
    }
}

/// Linear regression of the β curve using integer math only.
#[must_use]
pub fn linear_celsius(counts: u16) -> i16 {
    let scaled = i32::from(counts) * 3 / -116 + 78;
    i16::try_from(scaled).unwrap_or(i16::MIN)
}

/// β-model temperature. Rail-to-rail readings have no finite answer.
#[must_use]
pub fn beta_celsius(counts: u16) -> Option<f32> {
    if counts == 0 || counts >= ADC_FULL_SCALE {
        return None;
    }
    let counts = f32::from(counts);
    let resistance = NOMINAL_OHMS * counts / (f32::from(ADC_FULL_SCALE) - counts);
    let inverse_kelvin = libm::logf(resistance / NOMINAL_OHMS) / BETA + 1.0 / NOMINAL_KELVIN;
    Some(1.0 / inverse_kelvin - KELVIN_OFFSET)
}

fn round_to_i16(celsius: f32) -> i16 {
    let rounded = libm::roundf(celsius);
    if rounded >= f32::from(i16::MAX) {
        i16::MAX
    } else if rounded <= f32::from(i16::MIN) {
        i16::MIN
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let whole = rounded as i16;
        whole
    }
}
