//! Time-multiplexed LED driver.
//!
//! Four pins drive six LEDs: each adjacent pin pair hosts two LEDs wired in
//! opposite directions, and polarity selects which one lights. One LED is
//! serviced per slot of four ticks and stays lit for as many ticks as its
//! brightness.

use super::{LED_COUNT, LedGauge, MAX_BRIGHTNESS};

/// Pins shared by the multiplexed LEDs.
pub trait GaugePins {
    /// Returns every pin to high impedance.
    fn release_all(&mut self);

    /// Drives `high` to the supply and `low` to ground.
    fn drive(&mut self, high: usize, low: usize);
}

/// Renderer state advanced by the periodic tick.
#[derive(Clone, Debug)]
pub struct GaugeRenderer {
    ordering: [u8; LED_COUNT],
    led: usize,
    cycle: u8,
}

impl GaugeRenderer {
    /// `ordering` maps each gauge position to its physical LED slot.
    #[must_use]
    pub const fn new(ordering: [u8; LED_COUNT]) -> Self {
        Self {
            ordering,
            led: 0,
            cycle: 0,
        }
    }

    /// Gauge position currently being serviced.
    #[must_use]
    pub const fn current_led(&self) -> usize {
        self.led
    }

    /// Advances by one tick. Must run from a single context at a fixed rate.
    pub fn tick<P>(&mut self, gauge: &LedGauge, pins: &mut P)
    where
        P: GaugePins + ?Sized,
    {
        let level = gauge.level(self.led);

        if self.cycle == 0 && level > 0 {
            pins.release_all();
            let (high, low) = pin_pair(self.ordering[self.led]);
            pins.drive(high, low);
        }

        if self.cycle >= level {
            pins.release_all();
        }

        self.cycle += 1;
        if self.cycle >= MAX_BRIGHTNESS {
            self.cycle = 0;
            self.led = (self.led + 1) % LED_COUNT;
        }
    }
}

/// Pins to drive `(high, low)` for a physical LED slot.
#[must_use]
pub fn pin_pair(slot: u8) -> (usize, usize) {
    let first = usize::from(slot / 2);
    let second = first + 1;
    if slot % 2 == 1 {
        (second, first)
    } else {
        (first, second)
    }
}
