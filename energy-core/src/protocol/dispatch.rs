//! Executes decoded commands against the shared coprocessor state.
//!
//! Handlers never touch hardware. Queries read the published battery and
//! button state; power commands only record a request in the session, which
//! the main loop applies on its next step.

use core::fmt;

use crate::battery::{BatteryStatus, BreakpointError};
use crate::button::ButtonLatch;
use crate::clock::MonotonicInstant;
use crate::config::{API_VERSION, BoardRevision, FIRMWARE_VERSION};
use crate::gauge::LedGauge;
use crate::power::SharedSession;

use super::codec::Command;
use super::opcode::Opcode;

/// Reply to `GET_BATTERY_PERCENTAGE` when no profile is defined.
pub const PERCENTAGE_UNKNOWN: i32 = -1;

/// Reply to `GET_TEMPERATURE` when no thermistor reading is available.
pub const TEMPERATURE_UNKNOWN: i32 = -273;

/// Errors surfaced while executing a command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    Breakpoint(BreakpointError),
}

impl From<BreakpointError> for DispatchError {
    fn from(error: BreakpointError) -> Self {
        Self::Breakpoint(error)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Breakpoint(error) => write!(f, "breakpoint rejected: {error}"),
        }
    }
}

/// Handles on the state shared with the main loop and the renderer.
pub struct Dispatcher<'a, I> {
    session: &'a SharedSession<I>,
    gauge: &'a LedGauge,
    button: &'a ButtonLatch,
    battery: &'a BatteryStatus,
    board: &'a BoardRevision,
}

impl<'a, I> Dispatcher<'a, I>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub const fn new(
        session: &'a SharedSession<I>,
        gauge: &'a LedGauge,
        button: &'a ButtonLatch,
        battery: &'a BatteryStatus,
        board: &'a BoardRevision,
    ) -> Self {
        Self {
            session,
            gauge,
            button,
            battery,
            board,
        }
    }

    /// Runs one command. `Ok(Some(value))` must be written back to the host.
    pub fn dispatch(&self, command: Command, now: I) -> Result<Option<i32>, DispatchError> {
        let argument = command.argument;
        let reply = match command.opcode {
            Opcode::GetApiVersion => Some(API_VERSION),
            Opcode::GetFirmwareVersion => Some(FIRMWARE_VERSION),
            Opcode::GetHardwareRevision => Some(i32::from(self.board.revision)),
            Opcode::GetBatteryVoltage => Some(saturating_i32(self.battery.instant_mv())),
            Opcode::GetBatteryPercentage => Some(
                self.battery
                    .percentage()
                    .map_or(PERCENTAGE_UNKNOWN, i32::from),
            ),
            Opcode::GetBatteryType => Some(i32::from(self.battery.chemistry().to_raw())),
            Opcode::GetLoadCurrent => Some(saturating_i32(self.battery.load_ma())),
            Opcode::GetTemperature => Some(
                self.battery
                    .temperature_c()
                    .map_or(TEMPERATURE_UNKNOWN, i32::from),
            ),
            Opcode::GetButtonEvent => Some(i32::from(self.button.take().to_raw())),
            Opcode::SetLeds => {
                self.gauge.set_packed_decimal(argument);
                self.session.claim_leds(now);
                None
            }
            Opcode::SetLedGauge => {
                self.gauge.set_percentage(argument);
                self.session.claim_leds(now);
                None
            }
            Opcode::SetLoadSwitch => {
                self.session.request_load_switch(argument > 0);
                None
            }
            Opcode::Shutdown => {
                self.session.request_shutdown();
                None
            }
            Opcode::RequestReset => {
                self.session.request_reset();
                None
            }
            Opcode::SetBatteryVoltage(index) => {
                self.battery.set_breakpoint(index, argument)?;
                None
            }
            Opcode::EnterCriticalSection => {
                self.session.enter_critical_section(now, argument);
                None
            }
            Opcode::LeaveCriticalSection => {
                self.session.leave_critical_section(now);
                None
            }
        };
        Ok(reply)
    }
}

fn saturating_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
