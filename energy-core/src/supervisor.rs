//! Main-loop supervisor.
//!
//! [`Supervisor`] is the only context that samples the battery and drives
//! the rails. The UART handlers and the render tick reach the same data
//! through [`SharedState`], which lives in a `static` on the firmware.

use crate::battery::{AnalogFrontEnd, BatteryInit, BatteryMonitor, BatteryStatus};
use crate::button::ButtonLatch;
use crate::clock::{MonotonicInstant, deadline_reached};
use crate::config::{BoardRevision, TEMPERATURE_POLL_PERIOD, UNSAFE_BATTERY_NOTICE};
use crate::gauge::LedGauge;
use crate::power::{PowerPhase, PowerRails, PowerSequencer, PowerStep, SessionState, SharedSession};
use crate::protocol::Dispatcher;
use crate::status::StatusSnapshot;
use crate::telemetry::{TelemetryEventKind, TelemetryRecorder};

/// State touched by more than one execution context.
pub struct SharedState<I> {
    pub session: SharedSession<I>,
    pub gauge: LedGauge,
    pub button: ButtonLatch,
    pub battery: BatteryStatus,
}

impl<I> SharedState<I>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub const fn new(boot: I) -> Self {
        Self {
            session: SharedSession::new(SessionState::new(boot)),
            gauge: LedGauge::new(),
            button: ButtonLatch::new(),
            battery: BatteryStatus::new(),
        }
    }

    /// Command handler bound to this state.
    #[must_use]
    pub fn dispatcher<'a>(&'a self, board: &'a BoardRevision) -> Dispatcher<'a, I> {
        Dispatcher::new(
            &self.session,
            &self.gauge,
            &self.button,
            &self.battery,
            board,
        )
    }
}

pub struct Supervisor<I, A, R> {
    monitor: BatteryMonitor<A>,
    sequencer: PowerSequencer<I, R>,
    telemetry: TelemetryRecorder<I>,
    phase: PowerPhase,
    next_temperature_at: Option<I>,
    unsafe_shutdown_at: Option<I>,
    cutoff_requested: bool,
}

impl<I, A, R> Supervisor<I, A, R>
where
    I: MonotonicInstant,
    A: AnalogFrontEnd,
    R: PowerRails,
{
    #[must_use]
    pub fn new(monitor: BatteryMonitor<A>, rails: R) -> Self {
        Self {
            monitor,
            sequencer: PowerSequencer::new(rails),
            telemetry: TelemetryRecorder::new(),
            phase: PowerPhase::Startup,
            next_temperature_at: None,
            unsafe_shutdown_at: None,
            cutoff_requested: false,
        }
    }

    /// Checks the pack and brings up the rails it allows.
    pub fn boot(&mut self, shared: &SharedState<I>, now: I) -> BatteryInit {
        let init = self.monitor.initialize(&shared.battery);
        self.telemetry.record(
            TelemetryEventKind::BatteryChecked {
                cells: init.cells,
                safe: init.safe_to_power,
            },
            now,
        );

        self.sequencer.boot(&shared.session, now, init.safe_to_power);
        if !init.safe_to_power {
            self.unsafe_shutdown_at = Some(now + UNSAFE_BATTERY_NOTICE);
        }

        self.phase = shared.session.phase();
        self.telemetry
            .record(TelemetryEventKind::PhaseChanged(self.phase), now);
        self.sample_temperature(shared, now);
        self.refresh_display(shared, now);
        init
    }

    /// One main-loop iteration.
    pub fn poll(&mut self, shared: &SharedState<I>, now: I) -> PowerStep {
        self.monitor.poll(&shared.battery);
        if self
            .next_temperature_at
            .is_none_or(|at| deadline_reached(now, at))
        {
            self.sample_temperature(shared, now);
        }

        if self
            .unsafe_shutdown_at
            .is_some_and(|at| deadline_reached(now, at))
        {
            self.unsafe_shutdown_at = None;
            shared.session.request_shutdown();
            self.telemetry
                .record(TelemetryEventKind::UnsafeBatteryPowerOff, now);
        }
        self.check_low_battery(shared, now);

        let step = self.sequencer.poll(&shared.session, now);
        for event in &step.events {
            self.telemetry.record(TelemetryEventKind::Power(*event), now);
        }
        if step.phase != self.phase {
            self.phase = step.phase;
            self.telemetry
                .record(TelemetryEventKind::PhaseChanged(step.phase), now);
        }

        self.refresh_display(shared, now);
        step
    }

    /// Point-in-time view for status reporting.
    #[must_use]
    pub fn snapshot(&self, shared: &SharedState<I>, now: I) -> StatusSnapshot {
        let session = shared.session.snapshot();
        StatusSnapshot::capture(
            &session,
            &shared.battery,
            &shared.gauge,
            self.sequencer.load_enabled(),
            self.sequencer.host_enabled(),
            now,
        )
    }

    #[must_use]
    pub fn phase(&self) -> PowerPhase {
        self.phase
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder<I> {
        &self.telemetry
    }

    #[must_use]
    pub fn monitor(&self) -> &BatteryMonitor<A> {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut BatteryMonitor<A> {
        &mut self.monitor
    }

    #[must_use]
    pub fn sequencer(&self) -> &PowerSequencer<I, R> {
        &self.sequencer
    }

    fn sample_temperature(&mut self, shared: &SharedState<I>, now: I) {
        self.monitor.sample_temperature(&shared.battery);
        self.next_temperature_at = Some(now + TEMPERATURE_POLL_PERIOD);
    }

    fn check_low_battery(&mut self, shared: &SharedState<I>, now: I) {
        if self.cutoff_requested || self.phase != PowerPhase::Active {
            return;
        }
        let empty_mv = shared.battery.profile().breakpoints[0];
        let average_mv = shared.battery.average_mv();
        if empty_mv == 0 || average_mv >= empty_mv {
            return;
        }
        self.cutoff_requested = true;
        shared.session.request_shutdown();
        self.telemetry
            .record(TelemetryEventKind::LowBatteryCutoff { average_mv }, now);
    }

    fn refresh_display(&self, shared: &SharedState<I>, now: I) {
        let session = shared.session.snapshot();
        match session.phase {
            PowerPhase::Shutdown => shared.gauge.clear(),
            _ if session.leds_claimed(now) => {}
            _ => shared
                .gauge
                .display_battery_level(shared.battery.percentage(), now.as_millis()),
        }
    }
}
