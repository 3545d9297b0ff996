//! Push-button click detection and the single-slot event latch.

use core::fmt;
use core::time::Duration;

use heapless::Vec;
use portable_atomic::{AtomicU8, Ordering};

use crate::clock::MonotonicInstant;

/// Latched event answered to `GET_BUTTON_EVENT`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ButtonEvent {
    #[default]
    None,
    Click,
    DoubleClick,
}

impl ButtonEvent {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ButtonEvent::None => 0,
            ButtonEvent::Click => 1,
            ButtonEvent::DoubleClick => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            1 => ButtonEvent::Click,
            2 => ButtonEvent::DoubleClick,
            _ => ButtonEvent::None,
        }
    }
}

impl fmt::Display for ButtonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ButtonEvent::None => "none",
            ButtonEvent::Click => "click",
            ButtonEvent::DoubleClick => "double-click",
        })
    }
}

/// Last-writer-wins slot between the button sampler and the host.
///
/// Only the latest event survives; a host that polls slowly misses earlier
/// clicks.
#[derive(Debug, Default)]
pub struct ButtonLatch {
    event: AtomicU8,
}

impl ButtonLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: AtomicU8::new(0),
        }
    }

    pub fn post(&self, event: ButtonEvent) {
        self.event.store(event.to_raw(), Ordering::Relaxed);
    }

    /// Returns the latched event and resets the slot in one atomic step.
    pub fn take(&self) -> ButtonEvent {
        ButtonEvent::from_raw(self.event.swap(ButtonEvent::None.to_raw(), Ordering::Relaxed))
    }

    #[must_use]
    pub fn peek(&self) -> ButtonEvent {
        ButtonEvent::from_raw(self.event.load(Ordering::Relaxed))
    }
}

/// Everything the detector reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Pressed,
    Released,
    Clicked,
    DoubleClicked,
    LongPressed,
}

impl ButtonAction {
    /// Event to latch for the host, if any.
    #[must_use]
    pub const fn latched(self) -> Option<ButtonEvent> {
        match self {
            ButtonAction::Clicked => Some(ButtonEvent::Click),
            ButtonAction::DoubleClicked => Some(ButtonEvent::DoubleClick),
            ButtonAction::Pressed | ButtonAction::Released | ButtonAction::LongPressed => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ButtonConfig {
    pub debounce: Duration,
    /// Longest press that still counts as a click.
    pub click: Duration,
    /// Window after a click in which a second click makes a double click.
    pub double_click: Duration,
    pub long_press: Duration,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            click: Duration::from_millis(200),
            double_click: Duration::from_millis(400),
            long_press: Duration::from_millis(1_000),
        }
    }
}

/// Actions produced by one sample.
pub type ButtonActions = Vec<ButtonAction, 3>;

/// Debounces a sampled button level and classifies presses.
#[derive(Clone, Debug)]
pub struct ClickDetector<I> {
    config: ButtonConfig,
    raw: bool,
    raw_since: Option<I>,
    stable: bool,
    pressed_at: Option<I>,
    long_reported: bool,
    last_click_at: Option<I>,
}

impl<I> ClickDetector<I>
where
    I: MonotonicInstant,
{
    #[must_use]
    pub const fn new(config: ButtonConfig) -> Self {
        Self {
            config,
            raw: false,
            raw_since: None,
            stable: false,
            pressed_at: None,
            long_reported: false,
            last_click_at: None,
        }
    }

    /// Feeds the current level (`true` = pressed).
    pub fn sample(&mut self, now: I, pressed: bool) -> ButtonActions {
        let mut actions = ButtonActions::new();

        if pressed != self.raw {
            self.raw = pressed;
            self.raw_since = Some(now);
        }

        let settled = self
            .raw_since
            .is_none_or(|since| now.saturating_duration_since(since) >= self.config.debounce);

        if settled && self.raw != self.stable {
            self.stable = self.raw;
            if self.stable {
                self.pressed_at = Some(now);
                self.long_reported = false;
                push(&mut actions, ButtonAction::Pressed);
            } else {
                push(&mut actions, ButtonAction::Released);
                if let Some(click) = self.classify_release(now) {
                    push(&mut actions, click);
                }
            }
        }

        if self.stable && !self.long_reported {
            let held = self
                .pressed_at
                .map(|at| now.saturating_duration_since(at));
            if held.is_some_and(|held| held >= self.config.long_press) {
                self.long_reported = true;
                push(&mut actions, ButtonAction::LongPressed);
            }
        }

        actions
    }

    fn classify_release(&mut self, now: I) -> Option<ButtonAction> {
        let pressed_at = self.pressed_at.take()?;
        if self.long_reported || now.saturating_duration_since(pressed_at) >= self.config.click {
            return None;
        }

        let within_double = self
            .last_click_at
            .is_some_and(|last| now.saturating_duration_since(last) <= self.config.double_click);
        if within_double {
            self.last_click_at = None;
            Some(ButtonAction::DoubleClicked)
        } else {
            self.last_click_at = Some(now);
            Some(ButtonAction::Clicked)
        }
    }
}

fn push(actions: &mut ButtonActions, action: ButtonAction) {
    let pushed = actions.push(action);
    debug_assert!(pushed.is_ok(), "button action buffer overflow");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Millis;

    fn run(detector: &mut ClickDetector<Millis>, script: &[(u64, bool)]) -> Vec<ButtonAction, 16> {
        let mut seen = Vec::new();
        for &(at, pressed) in script {
            for action in detector.sample(Millis::new(at), pressed) {
                seen.push(action).expect("test capacity");
            }
        }
        seen
    }

    fn press(start: u64, hold: u64) -> [(u64, bool); 4] {
        [
            (start, true),
            (start + 60, true),
            (start + hold, false),
            (start + hold + 60, false),
        ]
    }

    #[test]
    fn latch_take_resets_to_none() {
        let latch = ButtonLatch::new();
        latch.post(ButtonEvent::Click);
        assert_eq!(latch.take(), ButtonEvent::Click);
        assert_eq!(latch.take(), ButtonEvent::None);
    }

    #[test]
    fn latch_keeps_only_the_last_event() {
        let latch = ButtonLatch::new();
        latch.post(ButtonEvent::Click);
        latch.post(ButtonEvent::DoubleClick);
        assert_eq!(latch.peek(), ButtonEvent::DoubleClick);
        assert_eq!(latch.take().to_raw(), 2);
    }

    #[test]
    fn short_press_is_a_click() {
        let mut detector = ClickDetector::new(ButtonConfig::default());
        let seen = run(&mut detector, &press(0, 150));
        assert_eq!(
            seen.as_slice(),
            &[
                ButtonAction::Pressed,
                ButtonAction::Released,
                ButtonAction::Clicked
            ]
        );
    }

    #[test]
    fn second_click_inside_window_is_a_double_click() {
        let mut detector = ClickDetector::new(ButtonConfig::default());
        let mut script: Vec<(u64, bool), 8> = Vec::new();
        script.extend_from_slice(&press(0, 120)).expect("fits");
        script.extend_from_slice(&press(250, 120)).expect("fits");

        let latched: Vec<ButtonEvent, 4> = run(&mut detector, &script)
            .iter()
            .filter_map(|action| action.latched())
            .collect();
        assert_eq!(
            latched.as_slice(),
            &[ButtonEvent::Click, ButtonEvent::DoubleClick]
        );
    }

    #[test]
    fn bounce_shorter_than_debounce_is_ignored() {
        let mut detector = ClickDetector::new(ButtonConfig::default());
        let seen = run(&mut detector, &[(0, true), (10, false), (20, true), (30, false), (100, false)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn long_hold_reports_long_press_and_no_click() {
        let mut detector = ClickDetector::new(ButtonConfig::default());
        let seen = run(
            &mut detector,
            &[(0, true), (60, true), (1_100, true), (1_200, false), (1_300, false)],
        );
        assert_eq!(
            seen.as_slice(),
            &[
                ButtonAction::Pressed,
                ButtonAction::LongPressed,
                ButtonAction::Released
            ]
        );
    }

    #[test]
    fn zero_length_timings_report_press_and_long_press_together() {
        let mut detector = ClickDetector::new(ButtonConfig {
            debounce: Duration::ZERO,
            click: Duration::ZERO,
            double_click: Duration::ZERO,
            long_press: Duration::ZERO,
        });
        let actions = detector.sample(Millis::ZERO, true);
        assert_eq!(
            actions.as_slice(),
            &[ButtonAction::Pressed, ButtonAction::LongPressed]
        );
    }
}
