//! Bounded history of supervisor events.
//!
//! The ring keeps the most recent [`TELEMETRY_RING_CAPACITY`] records so the
//! emulator and a debugger can reconstruct what the power logic did without a
//! logging transport.

use core::fmt;
use core::time::Duration;

use heapless::HistoryBuf;

use crate::clock::MonotonicInstant;
use crate::power::{PowerEvent, PowerPhase};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryEventKind {
    BatteryChecked { cells: Option<u8>, safe: bool },
    PhaseChanged(PowerPhase),
    Power(PowerEvent),
    LowBatteryCutoff { average_mv: u32 },
    UnsafeBatteryPowerOff,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::BatteryChecked { cells, safe } => match cells {
                Some(cells) => write!(f, "battery-checked cells={cells} safe={safe}"),
                None => write!(f, "battery-checked cells=? safe={safe}"),
            },
            TelemetryEventKind::PhaseChanged(phase) => write!(f, "phase {phase}"),
            TelemetryEventKind::Power(event) => match event {
                PowerEvent::AutoEnabled => f.write_str("auto-enable"),
                PowerEvent::LoadSwitched(true) => f.write_str("load-on"),
                PowerEvent::LoadSwitched(false) => f.write_str("load-off"),
                PowerEvent::HostResetStarted => f.write_str("host-reset-start"),
                PowerEvent::HostResetReleased => f.write_str("host-reset-release"),
                PowerEvent::ShutdownDeferred => f.write_str("shutdown-deferred"),
                PowerEvent::ShutdownExecuted => f.write_str("shutdown"),
            },
            TelemetryEventKind::LowBatteryCutoff { average_mv } => {
                write!(f, "low-battery-cutoff {average_mv}mV")
            }
            TelemetryEventKind::UnsafeBatteryPowerOff => f.write_str("unsafe-battery-power-off"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<I> {
    pub id: EventId,
    pub timestamp: I,
    pub event: TelemetryEventKind,
    /// Time since the previous record, if any.
    pub since_previous: Option<Duration>,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<I, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord<I>, CAPACITY>,
    next_event_id: EventId,
}

impl<I, const CAPACITY: usize> Default for TelemetryRecorder<I, CAPACITY>
where
    I: MonotonicInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, const CAPACITY: usize> TelemetryRecorder<I, CAPACITY>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    pub fn record(&mut self, event: TelemetryEventKind, timestamp: I) -> EventId {
        let since_previous = self
            .latest()
            .map(|previous| timestamp.saturating_duration_since(previous.timestamp));
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            since_previous,
        });
        id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<I>> {
        self.ring.recent()
    }

    /// Records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<I>> + '_ {
        self.ring.oldest_ordered()
    }

    /// Records newer than `id`, oldest first.
    pub fn since(&self, id: Option<EventId>) -> impl Iterator<Item = &TelemetryRecord<I>> + '_ {
        self.oldest_first()
            .filter(move |record| id.is_none_or(|seen| record.id > seen))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest().is_none()
    }
}
