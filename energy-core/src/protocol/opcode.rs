//! Single-character opcode catalog.

use core::fmt;

/// Every command understood by the coprocessor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    GetApiVersion,
    GetFirmwareVersion,
    GetHardwareRevision,
    GetBatteryVoltage,
    GetBatteryPercentage,
    GetBatteryType,
    GetLoadCurrent,
    GetTemperature,
    SetLeds,
    SetLedGauge,
    SetLoadSwitch,
    Shutdown,
    RequestReset,
    /// Overwrites one breakpoint of a custom battery profile.
    SetBatteryVoltage(u8),
    EnterCriticalSection,
    LeaveCriticalSection,
    GetButtonEvent,
}

/// Opcodes in wire order, breakpoints included.
pub const ALL_OPCODES: [Opcode; 23] = [
    Opcode::GetApiVersion,
    Opcode::GetFirmwareVersion,
    Opcode::GetHardwareRevision,
    Opcode::GetBatteryVoltage,
    Opcode::GetBatteryPercentage,
    Opcode::GetBatteryType,
    Opcode::GetLoadCurrent,
    Opcode::GetTemperature,
    Opcode::SetLeds,
    Opcode::SetLedGauge,
    Opcode::SetLoadSwitch,
    Opcode::Shutdown,
    Opcode::RequestReset,
    Opcode::SetBatteryVoltage(0),
    Opcode::SetBatteryVoltage(1),
    Opcode::SetBatteryVoltage(2),
    Opcode::SetBatteryVoltage(3),
    Opcode::SetBatteryVoltage(4),
    Opcode::SetBatteryVoltage(5),
    Opcode::SetBatteryVoltage(6),
    Opcode::EnterCriticalSection,
    Opcode::LeaveCriticalSection,
    Opcode::GetButtonEvent,
];

impl Opcode {
    /// Decodes the opcode character that follows the preamble.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        let opcode = match byte {
            b'A' => Opcode::GetApiVersion,
            b'F' => Opcode::GetFirmwareVersion,
            b'H' => Opcode::GetHardwareRevision,
            b'V' => Opcode::GetBatteryVoltage,
            b'%' => Opcode::GetBatteryPercentage,
            b'T' => Opcode::GetBatteryType,
            b'I' => Opcode::GetLoadCurrent,
            b'C' => Opcode::GetTemperature,
            b'D' => Opcode::SetLeds,
            b'G' => Opcode::SetLedGauge,
            b'P' => Opcode::SetLoadSwitch,
            b'S' => Opcode::Shutdown,
            b'R' => Opcode::RequestReset,
            b'0'..=b'6' => Opcode::SetBatteryVoltage(byte - b'0'),
            b'E' => Opcode::EnterCriticalSection,
            b'L' => Opcode::LeaveCriticalSection,
            b'B' => Opcode::GetButtonEvent,
            _ => return None,
        };
        Some(opcode)
    }

    /// Wire character for this opcode.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Opcode::GetApiVersion => b'A',
            Opcode::GetFirmwareVersion => b'F',
            Opcode::GetHardwareRevision => b'H',
            Opcode::GetBatteryVoltage => b'V',
            Opcode::GetBatteryPercentage => b'%',
            Opcode::GetBatteryType => b'T',
            Opcode::GetLoadCurrent => b'I',
            Opcode::GetTemperature => b'C',
            Opcode::SetLeds => b'D',
            Opcode::SetLedGauge => b'G',
            Opcode::SetLoadSwitch => b'P',
            Opcode::Shutdown => b'S',
            Opcode::RequestReset => b'R',
            Opcode::SetBatteryVoltage(index) => b'0' + index,
            Opcode::EnterCriticalSection => b'E',
            Opcode::LeaveCriticalSection => b'L',
            Opcode::GetButtonEvent => b'B',
        }
    }

    /// Returns `true` when frames for this opcode carry a numeric argument.
    #[must_use]
    pub const fn has_argument(self) -> bool {
        matches!(
            self,
            Opcode::SetLeds
                | Opcode::SetLedGauge
                | Opcode::SetLoadSwitch
                | Opcode::SetBatteryVoltage(_)
                | Opcode::EnterCriticalSection
        )
    }

    /// Returns `true` when the coprocessor answers this opcode.
    #[must_use]
    pub const fn expects_response(self) -> bool {
        matches!(
            self,
            Opcode::GetApiVersion
                | Opcode::GetFirmwareVersion
                | Opcode::GetHardwareRevision
                | Opcode::GetBatteryVoltage
                | Opcode::GetBatteryPercentage
                | Opcode::GetBatteryType
                | Opcode::GetLoadCurrent
                | Opcode::GetTemperature
                | Opcode::GetButtonEvent
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::GetApiVersion => "GET_API_VERSION",
            Opcode::GetFirmwareVersion => "GET_FW_VERSION",
            Opcode::GetHardwareRevision => "GET_HW_REVISION",
            Opcode::GetBatteryVoltage => "GET_BATTERY_VOLTAGE",
            Opcode::GetBatteryPercentage => "GET_BATTERY_PERCENTAGE",
            Opcode::GetBatteryType => "GET_BATTERY_TYPE",
            Opcode::GetLoadCurrent => "GET_LOAD_CURRENT",
            Opcode::GetTemperature => "GET_TEMPERATURE",
            Opcode::SetLeds => "SET_LEDS",
            Opcode::SetLedGauge => "SET_LED_GAUGE",
            Opcode::SetLoadSwitch => "SET_LOAD_SWITCH",
            Opcode::Shutdown => "SHUTDOWN",
            Opcode::RequestReset => "REQUEST_RESET",
            Opcode::SetBatteryVoltage(_) => "SET_BATTERY_VOLTAGE",
            Opcode::EnterCriticalSection => "ENTER_CRITICAL_SECTION",
            Opcode::LeaveCriticalSection => "LEAVE_CRITICAL_SECTION",
            Opcode::GetButtonEvent => "GET_BUTTON_EVENT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::SetBatteryVoltage(index) => write!(f, "{}_{index}", self.name()),
            other => f.write_str(other.name()),
        }
    }
}
