//! Shared status surface.
//!
//! [`StatusSnapshot`] collects the session, rail and battery state in one
//! value so the emulator and the firmware log render the same view.
//! [`StatusFormatter`] keeps the textual rendering consistent across
//! front-ends.

use core::fmt;
use core::time::Duration;

use crate::battery::BatteryStatus;
use crate::battery::profile::Chemistry;
use crate::clock::MonotonicInstant;
use crate::gauge::{LED_COUNT, LedGauge};
use crate::power::{PowerPhase, SessionState};

/// Battery readings as published by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatterySnapshot {
    pub chemistry: Chemistry,
    pub instant_mv: u32,
    pub average_mv: u32,
    pub percentage: Option<u8>,
    pub load_ma: u32,
    pub temperature_c: Option<i16>,
    pub safe_to_power: bool,
}

impl BatterySnapshot {
    #[must_use]
    pub fn capture(status: &BatteryStatus) -> Self {
        Self {
            chemistry: status.chemistry(),
            instant_mv: status.instant_mv(),
            average_mv: status.average_mv(),
            percentage: status.percentage(),
            load_ma: status.load_ma(),
            temperature_c: status.temperature_c(),
            safe_to_power: status.safe_to_power(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub phase: PowerPhase,
    pub load_enabled: bool,
    pub host_enabled: bool,
    pub shutdown_pending: bool,
    /// Time left in the host's critical section, `None` outside one.
    pub critical_remaining: Option<Duration>,
    pub leds_claimed: bool,
    pub leds: [u8; LED_COUNT],
    pub battery: BatterySnapshot,
}

impl StatusSnapshot {
    #[must_use]
    pub fn capture<I: MonotonicInstant>(
        session: &SessionState<I>,
        battery: &BatteryStatus,
        gauge: &LedGauge,
        load_enabled: bool,
        host_enabled: bool,
        now: I,
    ) -> Self {
        let critical_remaining = session
            .in_critical_section(now)
            .then(|| session.critical_remaining(now));
        Self {
            phase: session.phase,
            load_enabled,
            host_enabled,
            shutdown_pending: session.shutdown_requested && session.phase != PowerPhase::Shutdown,
            critical_remaining,
            leds_claimed: session.leds_claimed(now),
            leds: gauge.levels(),
            battery: BatterySnapshot::capture(battery),
        }
    }
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// `power phase=active load=on host=on critical=+2.5s`
    pub fn write_power_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "power phase={} load={} host={}",
            snapshot.phase,
            on_off(snapshot.load_enabled),
            on_off(snapshot.host_enabled)
        )?;
        writer.write_str(" critical=")?;
        write_duration(writer, snapshot.critical_remaining)?;
        if snapshot.shutdown_pending {
            writer.write_str(" shutdown=pending")?;
        }
        Ok(())
    }

    /// `battery lipo 11734mV avg=11702mV 58% load=120mA temp=24C`
    pub fn write_battery_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let battery = &self.snapshot.battery;
        write!(
            writer,
            "battery {} {}mV avg={}mV ",
            battery.chemistry, battery.instant_mv, battery.average_mv
        )?;
        match battery.percentage {
            Some(percent) => write!(writer, "{percent}%")?,
            None => writer.write_str("?%")?,
        }
        write!(writer, " load={}mA temp=", battery.load_ma)?;
        match battery.temperature_c {
            Some(celsius) => write!(writer, "{celsius}C")?,
            None => writer.write_str("n/a")?,
        }
        if !battery.safe_to_power {
            writer.write_str(" unsafe")?;
        }
        Ok(())
    }

    /// `leds [4 4 4 2 0 0] host`
    pub fn write_gauge_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("leds [")?;
        for (index, level) in self.snapshot.leds.iter().enumerate() {
            if index > 0 {
                writer.write_char(' ')?;
            }
            write!(writer, "{level}")?;
        }
        writer.write_char(']')?;
        writer.write_str(if self.snapshot.leds_claimed {
            " host"
        } else {
            " battery"
        })
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn write_duration<W: fmt::Write>(writer: &mut W, duration: Option<Duration>) -> fmt::Result {
    match duration {
        None => writer.write_str("n/a"),
        Some(value) if value >= Duration::from_secs(1) => {
            let millis = value.as_millis();
            let seconds = millis / 1_000;
            let tenths = (millis % 1_000) / 100;
            write!(writer, "+{seconds}.{tenths}s")
        }
        Some(value) => write!(writer, "+{}ms", value.as_millis()),
    }
}
