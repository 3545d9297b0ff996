//! Six-LED brightness gauge.
//!
//! The state of all LEDs lives in one 32-bit word, four bits per LED, so the
//! render tick always observes a consistent frame. Writers build the whole
//! word and publish it with a single store, or use an atomic update when
//! only one LED changes.

pub mod render;

use portable_atomic::{AtomicU32, Ordering};

use crate::config::LOW_BATTERY_PERCENT;

pub use self::render::{GaugePins, GaugeRenderer};

/// LEDs on the gauge.
pub const LED_COUNT: usize = 6;

/// Brightness steps per LED (0 = off, 4 = fully on).
pub const MAX_BRIGHTNESS: u8 = 4;

const NIBBLE_BITS: usize = 4;
const NIBBLE_MASK: u32 = 0xF;

/// Packs per-LED brightness into a gauge word, clamping each level.
#[must_use]
pub fn pack(levels: [u8; LED_COUNT]) -> u32 {
    levels
        .iter()
        .enumerate()
        .fold(0, |word, (index, &level)| {
            word | (u32::from(level.min(MAX_BRIGHTNESS)) << (index * NIBBLE_BITS))
        })
}

/// Extracts one LED's brightness from a gauge word.
#[must_use]
pub fn level_of(word: u32, index: usize) -> u8 {
    if index >= LED_COUNT {
        return 0;
    }
    let nibble = (word >> (index * NIBBLE_BITS)) & NIBBLE_MASK;
    u8::try_from(nibble).unwrap_or(0)
}

/// Levels for a linear gauge: `floor(v * 6 / 100)` full LEDs and one partial.
#[must_use]
pub fn percentage_levels(percent: i32) -> [u8; LED_COUNT] {
    let scaled = u32::try_from(percent.clamp(0, 100)).unwrap_or(0) * 6;
    let full = usize::try_from(scaled / 100).unwrap_or(LED_COUNT);
    let partial = (scaled % 100) * u32::from(MAX_BRIGHTNESS) / 100;

    let mut levels = [0; LED_COUNT];
    for level in levels.iter_mut().take(full) {
        *level = MAX_BRIGHTNESS;
    }
    if let Some(level) = levels.get_mut(full) {
        *level = u8::try_from(partial).unwrap_or(0);
    }
    levels
}

/// Decodes a packed decimal argument: the least significant digit is LED 0.
#[must_use]
pub fn decimal_levels(digits: i32) -> [u8; LED_COUNT] {
    let mut remaining = digits;
    let mut levels = [0; LED_COUNT];
    for level in &mut levels {
        let digit = (remaining % 10).max(0);
        *level = u8::try_from(digit).unwrap_or(0).min(MAX_BRIGHTNESS);
        remaining /= 10;
    }
    levels
}

/// Shared LED state written by the control contexts and read by the renderer.
#[derive(Debug, Default)]
pub struct LedGauge {
    word: AtomicU32,
}

impl LedGauge {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn word(&self) -> u32 {
        self.word.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self, index: usize) -> u8 {
        level_of(self.word(), index)
    }

    #[must_use]
    pub fn levels(&self) -> [u8; LED_COUNT] {
        let word = self.word();
        core::array::from_fn(|index| level_of(word, index))
    }

    pub fn store_levels(&self, levels: [u8; LED_COUNT]) {
        self.word.store(pack(levels), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.word.store(0, Ordering::Relaxed);
    }

    /// Lights exactly one LED; every other LED turns off.
    pub fn set_single(&self, index: usize, level: u8) {
        if index >= LED_COUNT {
            return;
        }
        let mut levels = [0; LED_COUNT];
        levels[index] = level;
        self.store_levels(levels);
    }

    /// Changes one LED and keeps the others.
    pub fn set_led(&self, index: usize, level: u8) {
        if index >= LED_COUNT {
            return;
        }
        let shift = index * NIBBLE_BITS;
        let nibble = u32::from(level.min(MAX_BRIGHTNESS)) << shift;
        let _ = self
            .word
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |word| {
                Some((word & !(NIBBLE_MASK << shift)) | nibble)
            });
    }

    pub fn set_packed_decimal(&self, digits: i32) {
        self.store_levels(decimal_levels(digits));
    }

    pub fn set_percentage(&self, percent: i32) {
        self.store_levels(percentage_levels(percent));
    }

    /// Battery display: slow full blink when unknown, fast blink of the first
    /// LED below the low threshold, proportional gauge otherwise.
    pub fn display_battery_level(&self, level: Option<u8>, now_ms: u64) {
        match level {
            None => {
                if now_ms % 1_000 < 500 {
                    self.set_percentage(100);
                } else {
                    self.clear();
                }
            }
            Some(percent) if percent < LOW_BATTERY_PERCENT => {
                if now_ms % 1_000 < 600 && now_ms % 200 < 100 {
                    self.set_single(0, MAX_BRIGHTNESS);
                } else {
                    self.clear();
                }
            }
            Some(percent) => self.set_percentage(i32::from(percent)),
        }
    }

    /// Power-on indicator: one dim LED whose position follows the charge.
    pub fn display_single_led_battery_level(&self, level: Option<u8>) {
        let index = level.map_or(0, |percent| {
            (usize::from(percent.min(100)) * LED_COUNT / 100).min(LED_COUNT - 1)
        });
        self.set_single(index, 1);
    }
}
