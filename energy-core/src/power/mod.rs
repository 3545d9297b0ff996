//! Power sequencing for the self-power latch, the load switch and the host.

pub mod session;

use heapless::Vec;

use crate::clock::{MonotonicInstant, deadline_reached};
use crate::config::HOST_RESET_PULSE;

pub use self::session::{PowerPhase, SessionState, SharedSession, critical_section_length};

/// Output lines owned by the sequencer.
pub trait PowerRails {
    /// Latch that keeps the coprocessor itself powered.
    fn set_self_power(&mut self, enabled: bool);

    /// Main load output.
    fn set_load_switch(&mut self, enabled: bool);

    /// Enable line of the host processor.
    fn set_host_enabled(&mut self, enabled: bool);
}

/// Rails that ignore every request, for bring-up without hardware.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopRails;

impl PowerRails for NoopRails {
    fn set_self_power(&mut self, _enabled: bool) {}

    fn set_load_switch(&mut self, _enabled: bool) {}

    fn set_host_enabled(&mut self, _enabled: bool) {}
}

/// Observable outcomes of one sequencer step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    AutoEnabled,
    LoadSwitched(bool),
    HostResetStarted,
    HostResetReleased,
    ShutdownDeferred,
    ShutdownExecuted,
}

pub type PowerEvents = Vec<PowerEvent, 6>;

/// Result of [`PowerSequencer::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PowerStep {
    pub phase: PowerPhase,
    pub events: PowerEvents,
}

#[derive(Copy, Clone, Debug, Default)]
struct Decision {
    load: Option<bool>,
    auto_enabled: bool,
    reset: bool,
    deferred: bool,
    shutdown: bool,
}

/// Applies session requests to the rails from the main loop.
pub struct PowerSequencer<I, R> {
    rails: R,
    load_enabled: bool,
    host_enabled: bool,
    safe_to_power: bool,
    reset_release_at: Option<I>,
    deferral_reported: bool,
}

impl<I, R> PowerSequencer<I, R>
where
    I: MonotonicInstant,
    R: PowerRails,
{
    #[must_use]
    pub fn new(rails: R) -> Self {
        Self {
            rails,
            load_enabled: false,
            host_enabled: false,
            safe_to_power: false,
            reset_release_at: None,
            deferral_reported: false,
        }
    }

    /// Latches self power and, for a usable battery, starts the host and
    /// schedules the load-switch auto-enable.
    pub fn boot(&mut self, session: &SharedSession<I>, now: I, safe_to_power: bool) {
        self.safe_to_power = safe_to_power;
        self.rails.set_self_power(true);
        self.set_load(false);
        self.set_host(safe_to_power);
        if safe_to_power {
            session.schedule_auto_enable(now);
        } else {
            session.lock_out_power();
        }
    }

    /// Runs one main-loop step.
    pub fn poll(&mut self, session: &SharedSession<I>, now: I) -> PowerStep {
        let mut events = PowerEvents::new();

        let (phase, decision) = session.update(|state| {
            let mut decision = Decision::default();
            if state.phase == PowerPhase::Shutdown {
                return (state.phase, decision);
            }

            if state
                .auto_enable_at
                .is_some_and(|at| deadline_reached(now, at))
            {
                state.auto_enable_at = None;
                state.phase = PowerPhase::Active;
                decision.auto_enabled = true;
                decision.load = Some(true);
            }
            if let Some(enabled) = state.load_switch_request.take() {
                decision.load = Some(enabled);
            }
            decision.reset = core::mem::take(&mut state.reset_requested);

            if state.shutdown_requested {
                if state.in_critical_section(now) {
                    decision.deferred = true;
                } else {
                    state.phase = PowerPhase::Shutdown;
                    decision.shutdown = true;
                }
            }
            (state.phase, decision)
        });

        if decision.shutdown {
            self.power_off();
            record(&mut events, PowerEvent::ShutdownExecuted);
            return PowerStep { phase, events };
        }
        if phase == PowerPhase::Shutdown {
            return PowerStep { phase, events };
        }

        if decision.auto_enabled {
            record(&mut events, PowerEvent::AutoEnabled);
        }
        let allowed = decision
            .load
            .filter(|&enabled| enabled != self.load_enabled && (self.safe_to_power || !enabled));
        if let Some(enabled) = allowed {
            self.set_load(enabled);
            record(&mut events, PowerEvent::LoadSwitched(enabled));
        }

        if decision.reset && self.host_enabled {
            self.rails.set_host_enabled(false);
            self.reset_release_at = Some(now + HOST_RESET_PULSE);
            record(&mut events, PowerEvent::HostResetStarted);
        } else if self
            .reset_release_at
            .is_some_and(|at| deadline_reached(now, at))
        {
            self.reset_release_at = None;
            self.rails.set_host_enabled(self.host_enabled);
            record(&mut events, PowerEvent::HostResetReleased);
        }

        if decision.deferred && !self.deferral_reported {
            record(&mut events, PowerEvent::ShutdownDeferred);
        }
        self.deferral_reported = decision.deferred;

        PowerStep { phase, events }
    }

    #[must_use]
    pub fn load_enabled(&self) -> bool {
        self.load_enabled
    }

    #[must_use]
    pub fn host_enabled(&self) -> bool {
        self.host_enabled && self.reset_release_at.is_none()
    }

    #[must_use]
    pub fn rails(&self) -> &R {
        &self.rails
    }

    fn set_load(&mut self, enabled: bool) {
        self.load_enabled = enabled;
        self.rails.set_load_switch(enabled);
    }

    fn set_host(&mut self, enabled: bool) {
        self.host_enabled = enabled;
        self.rails.set_host_enabled(enabled);
    }

    fn power_off(&mut self) {
        self.reset_release_at = None;
        self.set_load(false);
        self.set_host(false);
        self.rails.set_self_power(false);
    }
}

fn record(events: &mut PowerEvents, event: PowerEvent) {
    let pushed = events.push(event);
    debug_assert!(pushed.is_ok(), "power event buffer overflow");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Millis;

    #[derive(Debug, Default)]
    struct RecordingRails {
        self_power: bool,
        load: bool,
        host: bool,
        host_toggles: usize,
    }

    impl PowerRails for RecordingRails {
        fn set_self_power(&mut self, enabled: bool) {
            self.self_power = enabled;
        }

        fn set_load_switch(&mut self, enabled: bool) {
            self.load = enabled;
        }

        fn set_host_enabled(&mut self, enabled: bool) {
            self.host = enabled;
            self.host_toggles += 1;
        }
    }

    fn booted(safe: bool) -> (SharedSession<Millis>, PowerSequencer<Millis, RecordingRails>) {
        let session = SharedSession::new(SessionState::new(Millis::ZERO));
        let mut sequencer = PowerSequencer::new(RecordingRails::default());
        sequencer.boot(&session, Millis::ZERO, safe);
        (session, sequencer)
    }

    #[test]
    fn auto_enable_fires_after_two_seconds() {
        let (session, mut sequencer) = booted(true);
        assert!(sequencer.rails().self_power);
        assert!(sequencer.rails().host);

        let step = sequencer.poll(&session, Millis::new(1_999));
        assert_eq!(step.phase, PowerPhase::Startup);
        assert!(!sequencer.rails().load);

        let step = sequencer.poll(&session, Millis::new(2_000));
        assert_eq!(step.phase, PowerPhase::Active);
        assert_eq!(
            step.events.as_slice(),
            &[PowerEvent::AutoEnabled, PowerEvent::LoadSwitched(true)]
        );
        assert!(sequencer.rails().load);
    }

    #[test]
    fn unsafe_boot_never_enables_anything() {
        let (session, mut sequencer) = booted(false);
        assert!(!sequencer.rails().host);
        let step = sequencer.poll(&session, Millis::new(10_000));
        assert_eq!(step.phase, PowerPhase::Startup);
        assert!(!sequencer.rails().load);
    }

    #[test]
    fn unsafe_boot_refuses_a_late_load_request() {
        let (session, mut sequencer) = booted(false);
        session.update(|state| state.load_switch_request = Some(true));
        let step = sequencer.poll(&session, Millis::new(15));
        assert!(step.events.is_empty());
        assert!(!sequencer.rails().load);
    }

    #[test]
    fn busiest_step_fits_the_event_buffer() {
        let (session, mut sequencer) = booted(true);
        session.enter_critical_section(Millis::ZERO, 5_000);
        session.request_reset();
        session.request_shutdown();

        let step = sequencer.poll(&session, Millis::new(2_000));
        assert_eq!(
            step.events.as_slice(),
            &[
                PowerEvent::AutoEnabled,
                PowerEvent::LoadSwitched(true),
                PowerEvent::HostResetStarted,
                PowerEvent::ShutdownDeferred,
            ]
        );
        assert!(step.events.len() < step.events.capacity());
    }

    #[test]
    fn shutdown_powers_everything_off() {
        let (session, mut sequencer) = booted(true);
        sequencer.poll(&session, Millis::new(2_000));
        session.request_shutdown();

        let step = sequencer.poll(&session, Millis::new(2_005));
        assert_eq!(step.phase, PowerPhase::Shutdown);
        assert_eq!(step.events.as_slice(), &[PowerEvent::ShutdownExecuted]);
        let rails = sequencer.rails();
        assert!(!rails.load && !rails.host && !rails.self_power);

        session.request_load_switch(true);
        let step = sequencer.poll(&session, Millis::new(3_000));
        assert_eq!(step.phase, PowerPhase::Shutdown);
        assert!(step.events.is_empty());
        assert!(!sequencer.rails().load);
    }

    #[test]
    fn shutdown_waits_for_critical_section() {
        let (session, mut sequencer) = booted(true);
        session.enter_critical_section(Millis::new(100), 1_000);
        session.request_shutdown();

        let step = sequencer.poll(&session, Millis::new(500));
        assert_eq!(step.phase, PowerPhase::Startup);
        assert_eq!(step.events.as_slice(), &[PowerEvent::ShutdownDeferred]);

        let step = sequencer.poll(&session, Millis::new(600));
        assert!(step.events.is_empty());

        let step = sequencer.poll(&session, Millis::new(1_100));
        assert_eq!(step.phase, PowerPhase::Shutdown);
    }

    #[test]
    fn host_reset_pulses_enable_line() {
        let (session, mut sequencer) = booted(true);
        session.request_reset();

        let step = sequencer.poll(&session, Millis::new(50));
        assert_eq!(step.events.as_slice(), &[PowerEvent::HostResetStarted]);
        assert!(!sequencer.rails().host);
        assert!(!sequencer.host_enabled());

        sequencer.poll(&session, Millis::new(55));
        assert!(!sequencer.rails().host);

        let step = sequencer.poll(&session, Millis::new(60));
        assert_eq!(step.events.as_slice(), &[PowerEvent::HostResetReleased]);
        assert!(sequencer.rails().host);
        assert_eq!(step.phase, PowerPhase::Startup);
    }

    #[test]
    fn reset_is_ignored_while_host_is_off() {
        let (session, mut sequencer) = booted(false);
        let toggles = sequencer.rails().host_toggles;
        session.request_reset();
        let step = sequencer.poll(&session, Millis::new(10));
        assert!(step.events.is_empty());
        assert_eq!(sequencer.rails().host_toggles, toggles);
    }
}
