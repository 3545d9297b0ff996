//! STM32F030 board wiring.
//!
//! Pin assignments differ between revisions only for the LED matrix, the
//! button and the thermistor; [`BoardPins::take`] resolves them once so the
//! tasks never branch on the revision again.

use embassy_futures::block_on;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Flex, Input, Level, Output, Pull, Speed};
use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals::Moder;
use embassy_stm32::peripherals::{ADC1, PA4};
use energy_core::battery::profile::Chemistry;
use energy_core::battery::{AnalogChannel, AnalogFrontEnd};
use energy_core::config::BoardRevision;
use energy_core::gauge::GaugePins;
use embassy_time::{Duration, block_for};
use energy_core::power::PowerRails;

const THERMISTOR_SETTLE: Duration = Duration::from_micros(10);
const THERMISTOR_PIN: usize = 4;

embassy_stm32::bind_interrupts!(pub struct AdcIrqs {
    ADC1 => hal::adc::InterruptHandler<ADC1>;
});

/// Peripherals the board adapters need, taken from the HAL once.
pub struct BoardParts {
    pub adc: Peri<'static, ADC1>,
    pub pa0: Peri<'static, hal::peripherals::PA0>,
    pub pa1: Peri<'static, hal::peripherals::PA1>,
    pub pa2: Peri<'static, hal::peripherals::PA2>,
    pub pa3: Peri<'static, hal::peripherals::PA3>,
    pub pa4: Peri<'static, PA4>,
    pub pa5: Peri<'static, hal::peripherals::PA5>,
    pub pa6: Peri<'static, hal::peripherals::PA6>,
    pub pa7: Peri<'static, hal::peripherals::PA7>,
    pub pa13: Peri<'static, hal::peripherals::PA13>,
    pub pa14: Peri<'static, hal::peripherals::PA14>,
    pub pb1: Peri<'static, hal::peripherals::PB1>,
    pub pf0: Peri<'static, hal::peripherals::PF0>,
    pub pf1: Peri<'static, hal::peripherals::PF1>,
}

/// Revision-resolved drivers.
pub struct BoardPins {
    pub gauge: MatrixPins,
    pub button: Input<'static>,
    pub rails: BoardRails,
    pub analog: BoardAnalog,
}

impl BoardPins {
    pub fn take(parts: BoardParts, board: &BoardRevision) -> Self {
        let BoardParts {
            adc,
            pa0,
            pa1,
            pa2,
            pa3,
            pa4,
            pa5,
            pa6,
            pa7,
            pa13,
            pa14,
            pb1,
            pf0,
            pf1,
        } = parts;

        let (matrix, button, thermistor) = if board.has_thermistor {
            (
                [Flex::new(pa3), Flex::new(pa2), Flex::new(pa0), Flex::new(pa1)],
                Input::new(pf1, Pull::Up),
                Some(Thermistor::new(pa4)),
            )
        } else {
            (
                [Flex::new(pa4), Flex::new(pa3), Flex::new(pa2), Flex::new(pa1)],
                Input::new(pa0, Pull::Up),
                None,
            )
        };

        let mut adc = Adc::new(adc, AdcIrqs);
        adc.set_sample_time(SampleTime::CYCLES239_5);

        Self {
            gauge: MatrixPins::new(matrix),
            button,
            rails: BoardRails {
                self_power: Output::new(pf0, Level::Low, Speed::Low),
                load_switch: Output::new(pa6, Level::Low, Speed::Low),
                host_enable: Output::new(pa7, Level::Low, Speed::Low),
            },
            analog: BoardAnalog {
                adc,
                battery: pb1.degrade_adc(),
                current: pa5.degrade_adc(),
                thermistor,
                lipo_select: Input::new(pa13, Pull::Up),
                life_select: Input::new(pa14, Pull::Up),
            },
        }
    }
}

/// Four charlieplexed pins shared by the six gauge LEDs.
pub struct MatrixPins {
    pins: [Flex<'static>; 4],
}

impl MatrixPins {
    fn new(mut pins: [Flex<'static>; 4]) -> Self {
        for pin in &mut pins {
            pin.set_as_input(Pull::None);
        }
        Self { pins }
    }
}

impl GaugePins for MatrixPins {
    fn release_all(&mut self) {
        for pin in &mut self.pins {
            pin.set_as_input(Pull::None);
        }
    }

    fn drive(&mut self, high: usize, low: usize) {
        if let Some(pin) = self.pins.get_mut(high) {
            pin.set_high();
            pin.set_as_output(Speed::Low);
        }
        if let Some(pin) = self.pins.get_mut(low) {
            pin.set_low();
            pin.set_as_output(Speed::Low);
        }
    }
}

pub struct BoardRails {
    self_power: Output<'static>,
    load_switch: Output<'static>,
    host_enable: Output<'static>,
}

fn drive(output: &mut Output<'static>, enabled: bool) {
    output.set_level(if enabled { Level::High } else { Level::Low });
}

impl PowerRails for BoardRails {
    fn set_self_power(&mut self, enabled: bool) {
        drive(&mut self.self_power, enabled);
    }

    fn set_load_switch(&mut self, enabled: bool) {
        drive(&mut self.load_switch, enabled);
    }

    fn set_host_enabled(&mut self, enabled: bool) {
        drive(&mut self.host_enable, enabled);
    }
}

/// Thermistor divider tap, driven low between conversions.
///
/// The ADC channel owns PA4; its mode is switched through the GPIO
/// registers so the channel and the parking output share one pin.
struct Thermistor {
    channel: AnyAdcChannel<ADC1>,
}

impl Thermistor {
    fn new(pin: Peri<'static, PA4>) -> Self {
        let thermistor = Self {
            channel: pin.degrade_adc(),
        };
        thermistor.park();
        thermistor
    }

    fn park(&self) {
        pac::GPIOA.bsrr().write(|w| w.set_br(THERMISTOR_PIN, true));
        pac::GPIOA
            .moder()
            .modify(|w| w.set_moder(THERMISTOR_PIN, Moder::OUTPUT));
    }

    fn release(&self) {
        pac::GPIOA
            .moder()
            .modify(|w| w.set_moder(THERMISTOR_PIN, Moder::ANALOG));
    }
}

pub struct BoardAnalog {
    adc: Adc<'static, ADC1>,
    battery: AnyAdcChannel<ADC1>,
    current: AnyAdcChannel<ADC1>,
    thermistor: Option<Thermistor>,
    lipo_select: Input<'static>,
    life_select: Input<'static>,
}

impl AnalogFrontEnd for BoardAnalog {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        let source = match channel {
            AnalogChannel::BatteryVoltage => &mut self.battery,
            AnalogChannel::LoadCurrent => &mut self.current,
            AnalogChannel::Thermistor => match self.thermistor.as_mut() {
                Some(thermistor) => &mut thermistor.channel,
                None => return 0,
            },
        };
        block_on(self.adc.read(source))
    }

    fn chemistry_selector(&mut self) -> Chemistry {
        Chemistry::from_selector(self.lipo_select.is_low(), self.life_select.is_low())
    }

    fn release_thermistor(&mut self) {
        if let Some(thermistor) = self.thermistor.as_ref() {
            thermistor.release();
            // Let the divider settle before the first conversion.
            block_for(THERMISTOR_SETTLE);
        }
    }

    fn park_thermistor(&mut self) {
        if let Some(thermistor) = self.thermistor.as_ref() {
            thermistor.park();
        }
    }
}
