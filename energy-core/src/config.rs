//! Board configuration and timing constants.
//!
//! Hardware differences between board revisions are expressed as data in
//! [`BOARD_REVISIONS`] and resolved once at startup through
//! [`BoardRevision::lookup`]. Everything else in the crate takes the resolved
//! record by reference.

use core::fmt;
use core::time::Duration;

/// Protocol API version answered to `GET_API_VERSION`.
pub const API_VERSION: i32 = 1;

/// Firmware version answered to `GET_FW_VERSION`.
pub const FIRMWARE_VERSION: i32 = 3;

/// Revision assumed when the build does not declare one.
pub const DEFAULT_BOARD_REVISION: u8 = 3;

/// Delay between boot and the automatic load-switch enable.
pub const AUTO_ENABLE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for a single `ENTER_CRITICAL_SECTION` request, in milliseconds.
pub const CRITICAL_SECTION_MAX_MS: i32 = 10_000;

/// Host enable low time for `REQUEST_RESET`.
pub const HOST_RESET_PULSE: Duration = Duration::from_millis(10);

/// Battery ADC polling period.
pub const BATTERY_POLL_PERIOD: Duration = Duration::from_millis(5);

/// Thermistor polling period.
pub const TEMPERATURE_POLL_PERIOD: Duration = Duration::from_secs(1);

/// LED render tick period (1 kHz).
pub const LED_TICK_PERIOD: Duration = Duration::from_millis(1);

/// How long host LED commands keep the battery display off the gauge.
pub const HOST_LED_HOLD: Duration = Duration::from_secs(5);

/// How long the unsafe-battery blink is shown before the board powers off.
pub const UNSAFE_BATTERY_NOTICE: Duration = Duration::from_secs(3);

/// Percentage below which the gauge switches to the low-battery blink.
pub const LOW_BATTERY_PERCENT: u8 = 10;

/// Static description of one board revision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoardRevision {
    pub revision: u8,
    /// Load-current sense resistor in ohms.
    pub current_sense_ohms: u32,
    /// Virtual LED index to physical LED slot.
    pub led_ordering: [u8; 6],
    pub has_thermistor: bool,
}

impl BoardRevision {
    #[must_use]
    pub const fn new(
        revision: u8,
        current_sense_ohms: u32,
        led_ordering: [u8; 6],
        has_thermistor: bool,
    ) -> Self {
        Self {
            revision,
            current_sense_ohms,
            led_ordering,
            has_thermistor,
        }
    }

    /// Resolves a declared revision number against the revision table.
    pub fn lookup(revision: u8) -> Result<&'static BoardRevision, ConfigError> {
        BOARD_REVISIONS
            .iter()
            .find(|board| board.revision == revision)
            .ok_or(ConfigError::UnknownRevision(revision))
    }
}

/// Every board revision the firmware knows how to drive.
pub static BOARD_REVISIONS: [BoardRevision; 3] = [
    BoardRevision::new(1, 470, [1, 0, 3, 5, 4, 2], false),
    BoardRevision::new(2, 2000, [1, 0, 3, 5, 4, 2], true),
    BoardRevision::new(3, 2000, [1, 0, 3, 5, 4, 2], true),
];

/// Errors raised while resolving board configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    UnknownRevision(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownRevision(revision) => {
                write!(f, "unknown board revision {revision}")
            }
        }
    }
}
