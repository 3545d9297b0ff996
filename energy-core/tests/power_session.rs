use std::cell::RefCell;
use std::rc::Rc;

use energy_core::battery::calibration::DEFAULT_CALIBRATION;
use energy_core::battery::profile::Chemistry;
use energy_core::battery::{AnalogChannel, AnalogFrontEnd, BatteryMonitor, millivolts_to_counts};
use energy_core::clock::Millis;
use energy_core::config::BoardRevision;
use energy_core::power::{PowerEvent, PowerPhase, PowerRails};
use energy_core::protocol::{Command, Opcode};
use energy_core::telemetry::TelemetryEventKind;
use energy_core::{SharedState, Supervisor};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Rails {
    self_power: bool,
    load: bool,
    host: bool,
}

#[derive(Clone, Default)]
struct SharedRails(Rc<RefCell<Rails>>);

impl SharedRails {
    fn get(&self) -> Rails {
        *self.0.borrow()
    }
}

impl PowerRails for SharedRails {
    fn set_self_power(&mut self, enabled: bool) {
        self.0.borrow_mut().self_power = enabled;
    }

    fn set_load_switch(&mut self, enabled: bool) {
        self.0.borrow_mut().load = enabled;
    }

    fn set_host_enabled(&mut self, enabled: bool) {
        self.0.borrow_mut().host = enabled;
    }
}

struct Pack {
    counts: Rc<RefCell<u16>>,
}

impl AnalogFrontEnd for Pack {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        match channel {
            AnalogChannel::BatteryVoltage => *self.counts.borrow(),
            AnalogChannel::LoadCurrent | AnalogChannel::Thermistor => 1_000,
        }
    }

    fn chemistry_selector(&mut self) -> Chemistry {
        Chemistry::LiPo
    }
}

struct Board {
    shared: SharedState<Millis>,
    supervisor: Supervisor<Millis, Pack, SharedRails>,
    rails: SharedRails,
    pack_counts: Rc<RefCell<u16>>,
    board: &'static BoardRevision,
    now: u64,
}

impl Board {
    fn boot(millivolts: u32) -> Self {
        let board = BoardRevision::lookup(3).expect("known revision");
        let pack_counts = Rc::new(RefCell::new(millivolts_to_counts(
            millivolts,
            DEFAULT_CALIBRATION,
        )));
        let pack = Pack {
            counts: Rc::clone(&pack_counts),
        };
        let rails = SharedRails::default();
        let shared = SharedState::new(Millis::ZERO);
        let mut supervisor = Supervisor::new(
            BatteryMonitor::new(pack, board, DEFAULT_CALIBRATION),
            rails.clone(),
        );
        supervisor.boot(&shared, Millis::ZERO);
        Self {
            shared,
            supervisor,
            rails,
            pack_counts,
            board,
            now: 0,
        }
    }

    fn run_until(&mut self, until_ms: u64) -> PowerPhase {
        while self.now < until_ms {
            self.now += 5;
            self.supervisor.poll(&self.shared, Millis::new(self.now));
        }
        self.supervisor.phase()
    }

    fn send(&self, opcode: Opcode, argument: i32) {
        self.shared
            .dispatcher(self.board)
            .dispatch(
                Command::with_argument(opcode, argument),
                Millis::new(self.now),
            )
            .expect("accepted");
    }

    fn set_pack_mv(&self, millivolts: u32) {
        *self.pack_counts.borrow_mut() = millivolts_to_counts(millivolts, DEFAULT_CALIBRATION);
    }
}

#[test]
fn healthy_pack_powers_host_then_load() {
    let mut board = Board::boot(11_800);
    let rails = board.rails.get();
    assert!(rails.self_power && rails.host && !rails.load);

    assert_eq!(board.run_until(1_995), PowerPhase::Startup);
    assert!(!board.rails.get().load);
    assert_eq!(board.run_until(2_000), PowerPhase::Active);
    assert!(board.rails.get().load);
}

#[test]
fn host_decision_cancels_auto_enable() {
    let mut board = Board::boot(11_800);
    board.run_until(500);
    board.send(Opcode::SetLoadSwitch, 0);
    assert_eq!(board.run_until(3_000), PowerPhase::Active);
    assert!(!board.rails.get().load);

    board.send(Opcode::SetLoadSwitch, 1);
    board.run_until(3_005);
    assert!(board.rails.get().load);
}

#[test]
fn unsafe_pack_keeps_load_off_despite_host_request() {
    let mut board = Board::boot(19_000);
    assert!(!board.rails.get().host);

    board.run_until(10);
    board.send(Opcode::SetLoadSwitch, 1);
    assert_eq!(board.run_until(15), PowerPhase::Startup);
    assert!(!board.rails.get().load);

    assert_eq!(board.run_until(3_000), PowerPhase::Shutdown);
    assert_eq!(board.rails.get(), Rails::default());
}

#[test]
fn shutdown_waits_for_critical_section() {
    let mut board = Board::boot(11_800);
    board.run_until(2_500);
    board.send(Opcode::EnterCriticalSection, 4_000);
    board.send(Opcode::Shutdown, 0);

    assert_eq!(board.run_until(6_495), PowerPhase::Active);
    assert!(board.rails.get().host);
    assert_eq!(board.run_until(6_500), PowerPhase::Shutdown);
    assert_eq!(board.rails.get(), Rails::default());

    let deferred = board
        .supervisor
        .telemetry()
        .oldest_first()
        .filter(|record| record.event == TelemetryEventKind::Power(PowerEvent::ShutdownDeferred))
        .count();
    assert_eq!(deferred, 1);
}

#[test]
fn leaving_critical_section_releases_pending_shutdown() {
    let mut board = Board::boot(11_800);
    board.run_until(2_500);
    board.send(Opcode::EnterCriticalSection, 10_000);
    board.send(Opcode::Shutdown, 0);
    assert_eq!(board.run_until(4_000), PowerPhase::Active);

    board.send(Opcode::LeaveCriticalSection, 0);
    assert_eq!(board.run_until(4_005), PowerPhase::Shutdown);
}

#[test]
fn shutdown_is_terminal() {
    let mut board = Board::boot(11_800);
    board.run_until(2_100);
    board.send(Opcode::Shutdown, 0);
    board.run_until(2_105);
    board.send(Opcode::SetLoadSwitch, 1);
    board.send(Opcode::RequestReset, 0);
    assert_eq!(board.run_until(5_000), PowerPhase::Shutdown);
    assert_eq!(board.rails.get(), Rails::default());
    assert_eq!(board.shared.gauge.word(), 0);
}

#[test]
fn reset_pulses_host_enable() {
    let mut board = Board::boot(11_800);
    board.run_until(2_500);
    board.send(Opcode::RequestReset, 0);
    board.run_until(2_505);
    assert!(!board.rails.get().host);
    board.run_until(2_515);
    assert!(board.rails.get().host);
    assert_eq!(board.supervisor.phase(), PowerPhase::Active);
}

#[test]
fn empty_pack_triggers_low_battery_cutoff() {
    let mut board = Board::boot(11_000);
    board.run_until(2_500);
    board.set_pack_mv(9_000);
    let phase = board.run_until(60_000);
    assert_eq!(phase, PowerPhase::Shutdown);
    assert!(
        board
            .supervisor
            .telemetry()
            .oldest_first()
            .any(|record| matches!(record.event, TelemetryEventKind::LowBatteryCutoff { .. }))
    );
}
