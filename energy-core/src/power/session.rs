//! Session state shared between the command handlers and the main loop.
//!
//! Command handlers only record requests here; the main loop applies them to
//! the rails. Every read-modify-write happens inside one critical section so
//! the phase, the critical-section deadline and the pending requests are
//! always observed together.

use core::cell::Cell;
use core::fmt;
use core::time::Duration;

use critical_section::Mutex;

use crate::clock::MonotonicInstant;
use crate::config::{AUTO_ENABLE_DELAY, CRITICAL_SECTION_MAX_MS, HOST_LED_HOLD};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PowerPhase {
    /// Booted, waiting for the host or the auto-enable timer.
    Startup,
    Active,
    /// Terminal: every rail is off.
    Shutdown,
}

impl fmt::Display for PowerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerPhase::Startup => "startup",
            PowerPhase::Active => "active",
            PowerPhase::Shutdown => "shutdown",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SessionState<I> {
    pub phase: PowerPhase,
    /// Shutdown is deferred while `now < critical_until`.
    pub critical_until: I,
    pub auto_enable_at: Option<I>,
    pub shutdown_requested: bool,
    pub load_switch_request: Option<bool>,
    pub reset_requested: bool,
    /// Battery display stays off the gauge until this instant.
    pub leds_claimed_until: Option<I>,
    /// Set at boot when the pack is unsafe; no rail may come up afterwards.
    pub power_locked_out: bool,
}

impl<I> SessionState<I>
where
    I: MonotonicInstant,
{
    /// Fresh boot state with no critical section and nothing scheduled.
    #[must_use]
    pub const fn new(boot: I) -> Self {
        Self {
            phase: PowerPhase::Startup,
            critical_until: boot,
            auto_enable_at: None,
            shutdown_requested: false,
            load_switch_request: None,
            reset_requested: false,
            leds_claimed_until: None,
            power_locked_out: false,
        }
    }

    #[must_use]
    pub fn in_critical_section(&self, now: I) -> bool {
        now < self.critical_until
    }

    #[must_use]
    pub fn leds_claimed(&self, now: I) -> bool {
        self.leds_claimed_until.is_some_and(|until| now < until)
    }

    /// Time left before a pending shutdown may proceed.
    #[must_use]
    pub fn critical_remaining(&self, now: I) -> Duration {
        self.critical_until.saturating_duration_since(now)
    }
}

/// Clamps a requested critical-section length to `[0, 10 s]`.
#[must_use]
pub fn critical_section_length(requested_ms: i32) -> Duration {
    let clamped = requested_ms.clamp(0, CRITICAL_SECTION_MAX_MS);
    Duration::from_millis(u64::try_from(clamped).unwrap_or(0))
}

/// Interrupt-safe home of the [`SessionState`].
pub struct SharedSession<I> {
    state: Mutex<Cell<SessionState<I>>>,
}

impl<I> SharedSession<I>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub const fn new(initial: SessionState<I>) -> Self {
        Self {
            state: Mutex::new(Cell::new(initial)),
        }
    }

    /// Consistent copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState<I> {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    /// Applies `change` atomically with respect to every other context.
    pub fn update<R>(&self, change: impl FnOnce(&mut SessionState<I>) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            let result = change(&mut state);
            cell.set(state);
            result
        })
    }

    #[must_use]
    pub fn phase(&self) -> PowerPhase {
        self.snapshot().phase
    }

    /// Schedules the automatic load-switch enable.
    pub fn schedule_auto_enable(&self, now: I) {
        self.update(|state| {
            if state.phase == PowerPhase::Startup {
                state.auto_enable_at = Some(now + AUTO_ENABLE_DELAY);
            }
        });
    }

    /// Refuses every later load-switch request for this boot.
    pub fn lock_out_power(&self) {
        self.update(|state| {
            state.power_locked_out = true;
            state.auto_enable_at = None;
        });
    }

    /// `SET_LOAD_SWITCH`: an explicit host decision ends the startup phase.
    pub fn request_load_switch(&self, enabled: bool) {
        self.update(|state| {
            if state.phase == PowerPhase::Shutdown || state.power_locked_out {
                return;
            }
            if state.phase == PowerPhase::Startup {
                state.auto_enable_at = None;
                state.phase = PowerPhase::Active;
            }
            state.load_switch_request = Some(enabled);
        });
    }

    pub fn request_shutdown(&self) {
        self.update(|state| state.shutdown_requested = true);
    }

    /// `ENTER_CRITICAL_SECTION`: returns the new deadline.
    pub fn enter_critical_section(&self, now: I, requested_ms: i32) -> I {
        let deadline = now + critical_section_length(requested_ms);
        self.update(|state| state.critical_until = deadline);
        deadline
    }

    /// `LEAVE_CRITICAL_SECTION`.
    pub fn leave_critical_section(&self, now: I) {
        self.update(|state| state.critical_until = now);
    }

    pub fn request_reset(&self) {
        self.update(|state| {
            if state.phase != PowerPhase::Shutdown {
                state.reset_requested = true;
            }
        });
    }

    /// Keeps host-written LED patterns on the gauge for a while.
    pub fn claim_leds(&self, now: I) {
        self.update(|state| state.leds_claimed_until = Some(now + HOST_LED_HOLD));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Millis;

    fn session() -> SharedSession<Millis> {
        SharedSession::new(SessionState::new(Millis::ZERO))
    }

    #[test]
    fn critical_length_is_clamped() {
        assert_eq!(critical_section_length(-100), Duration::ZERO);
        assert_eq!(critical_section_length(2_500), Duration::from_millis(2_500));
        assert_eq!(critical_section_length(50_000), Duration::from_secs(10));
    }

    #[test]
    fn enter_sets_clamped_deadline() {
        let session = session();
        let deadline = session.enter_critical_section(Millis::new(1_000), 60_000);
        assert_eq!(deadline, Millis::new(11_000));
        assert!(session.snapshot().in_critical_section(Millis::new(10_999)));
        assert!(!session.snapshot().in_critical_section(Millis::new(11_000)));
    }

    #[test]
    fn leave_ends_critical_section_immediately() {
        let session = session();
        session.enter_critical_section(Millis::new(0), 5_000);
        session.leave_critical_section(Millis::new(1_000));
        let state = session.snapshot();
        assert!(!state.in_critical_section(Millis::new(1_000)));
        assert_eq!(state.critical_remaining(Millis::new(1_000)), Duration::ZERO);
    }

    #[test]
    fn load_switch_request_cancels_auto_enable() {
        let session = session();
        session.schedule_auto_enable(Millis::ZERO);
        assert_eq!(session.snapshot().auto_enable_at, Some(Millis::new(2_000)));

        session.request_load_switch(false);
        let state = session.snapshot();
        assert_eq!(state.phase, PowerPhase::Active);
        assert_eq!(state.auto_enable_at, None);
        assert_eq!(state.load_switch_request, Some(false));
    }

    #[test]
    fn requests_after_shutdown_are_ignored() {
        let session = session();
        session.update(|state| state.phase = PowerPhase::Shutdown);
        session.request_load_switch(true);
        session.request_reset();
        let state = session.snapshot();
        assert_eq!(state.load_switch_request, None);
        assert!(!state.reset_requested);
    }

    #[test]
    fn locked_out_session_ignores_load_requests() {
        let session = session();
        session.lock_out_power();
        session.request_load_switch(true);
        let state = session.snapshot();
        assert_eq!(state.phase, PowerPhase::Startup);
        assert_eq!(state.load_switch_request, None);
    }

    #[test]
    fn led_claim_expires() {
        let session = session();
        session.claim_leds(Millis::new(100));
        let state = session.snapshot();
        assert!(state.leds_claimed(Millis::new(5_099)));
        assert!(!state.leds_claimed(Millis::new(5_100)));
    }
}
