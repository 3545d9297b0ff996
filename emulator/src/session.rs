use std::collections::VecDeque;
use std::convert::Infallible;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crossterm::style::{Color, Stylize};
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use energy_core::battery::calibration::{
    CalibrationError, DEFAULT_CALIBRATION, FlashCalibration, effective_calibration,
};
use energy_core::battery::profile::Chemistry;
use energy_core::battery::temperature::TemperatureModel;
use energy_core::battery::{
    ADC_FULL_SCALE, ADC_REFERENCE_MV, AnalogChannel, AnalogFrontEnd, BatteryMonitor,
    millivolts_to_counts,
};
use energy_core::button::{ButtonConfig, ClickDetector};
use energy_core::clock::Millis;
use energy_core::config::BoardRevision;
use energy_core::power::{PowerPhase, PowerRails};
use energy_core::protocol::client::{ClientError, CommandClient, HostLink};
use energy_core::protocol::codec::{FrameBuffer, write_response};
use energy_core::protocol::{Command, FrameDecoder, Opcode};
use energy_core::status::StatusFormatter;
use energy_core::telemetry::EventId;
use energy_core::{SharedState, Supervisor};

const STEP_MS: u64 = 5;
const FLASH_PAGE: usize = 1024;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("### X [n]", "### <opcode> [arg]   - send a raw wire frame"),
    ("query", "query <opcode> [arg]  - send a command and wait for the reply"),
    ("advance", "advance <ms>          - run the main loop"),
    ("battery", "battery <mV>          - set the simulated pack voltage"),
    ("load", "load <mA>             - set the simulated load current"),
    ("thermistor", "thermistor <counts>   - set the raw thermistor reading"),
    ("click", "click | double | hold <ms> - press the button"),
    ("calibrate", "calibrate             - store the current reading as 24 V"),
    ("status", "status                - show rails, battery and gauge"),
    ("log", "log                   - show the telemetry ring"),
];

/// Simulated analog inputs.
pub struct SimFrontEnd {
    battery_counts: u16,
    current_counts: u16,
    thermistor_counts: u16,
    chemistry: Chemistry,
}

impl SimFrontEnd {
    pub fn new(millivolts: u32, chemistry: Chemistry) -> Self {
        Self {
            battery_counts: millivolts_to_counts(millivolts, DEFAULT_CALIBRATION),
            current_counts: 0,
            thermistor_counts: 2_048,
            chemistry,
        }
    }
}

impl AnalogFrontEnd for SimFrontEnd {
    fn read(&mut self, channel: AnalogChannel) -> u16 {
        match channel {
            AnalogChannel::BatteryVoltage => self.battery_counts,
            AnalogChannel::LoadCurrent => self.current_counts,
            AnalogChannel::Thermistor => self.thermistor_counts,
        }
    }

    fn chemistry_selector(&mut self) -> Chemistry {
        self.chemistry
    }
}

#[derive(Debug, Default)]
pub struct SimRails {
    pub self_power: bool,
    pub load: bool,
    pub host: bool,
}

impl PowerRails for SimRails {
    fn set_self_power(&mut self, enabled: bool) {
        self.self_power = enabled;
    }

    fn set_load_switch(&mut self, enabled: bool) {
        self.load = enabled;
    }

    fn set_host_enabled(&mut self, enabled: bool) {
        self.host = enabled;
    }
}

#[derive(Debug)]
pub struct SimFlashError;

impl NorFlashError for SimFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::OutOfBounds
    }
}

/// One erasable page of RAM-backed NOR flash.
pub struct SimFlash {
    cells: [u8; FLASH_PAGE],
}

impl SimFlash {
    pub fn erased() -> Self {
        Self {
            cells: [0xFF; FLASH_PAGE],
        }
    }

    fn range(offset: u32, len: usize) -> Result<std::ops::Range<usize>, SimFlashError> {
        let start = usize::try_from(offset).map_err(|_| SimFlashError)?;
        let end = start.checked_add(len).ok_or(SimFlashError)?;
        if end > FLASH_PAGE {
            return Err(SimFlashError);
        }
        Ok(start..end)
    }
}

impl ErrorType for SimFlash {
    type Error = SimFlashError;
}

impl ReadNorFlash for SimFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.cells[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        FLASH_PAGE
    }
}

impl NorFlash for SimFlash {
    const WRITE_SIZE: usize = 2;
    const ERASE_SIZE: usize = FLASH_PAGE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let len = usize::try_from(to.saturating_sub(from)).map_err(|_| SimFlashError)?;
        let range = Self::range(from, len)?;
        self.cells[range].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, bytes.len())?;
        for (cell, byte) in self.cells[range].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// Board options chosen on the command line.
#[derive(Clone, Copy, Debug)]
pub struct BoardOptions {
    pub revision: u8,
    pub battery_mv: u32,
    pub chemistry: Chemistry,
    pub temperature: TemperatureModel,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            revision: energy_core::config::DEFAULT_BOARD_REVISION,
            battery_mv: 11_800,
            chemistry: Chemistry::LiPo,
            temperature: TemperatureModel::Beta,
        }
    }
}

/// The simulated coprocessor: shared state, main loop and UART receive path.
pub struct SimBoard {
    shared: SharedState<Millis>,
    supervisor: Supervisor<Millis, SimFrontEnd, SimRails>,
    board: &'static BoardRevision,
    decoder: FrameDecoder,
    detector: ClickDetector<Millis>,
    button_pressed: bool,
    calibration: FlashCalibration<SimFlash>,
    now: Millis,
    logged: Option<EventId>,
}

impl SimBoard {
    pub fn boot(options: BoardOptions) -> Result<Self, String> {
        let board = BoardRevision::lookup(options.revision).map_err(|err| err.to_string())?;
        let mut calibration = FlashCalibration::new(SimFlash::erased(), 0);
        let counts = effective_calibration(&mut calibration);
        let monitor = BatteryMonitor::new(
            SimFrontEnd::new(options.battery_mv, options.chemistry),
            board,
            counts,
        )
        .with_temperature_model(options.temperature);

        let shared = SharedState::new(Millis::ZERO);
        let mut supervisor = Supervisor::new(monitor, SimRails::default());
        supervisor.boot(&shared, Millis::ZERO);

        Ok(Self {
            shared,
            supervisor,
            board,
            decoder: FrameDecoder::new(),
            detector: ClickDetector::new(ButtonConfig::default()),
            button_pressed: false,
            calibration,
            now: Millis::ZERO,
            logged: None,
        })
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn phase(&self) -> PowerPhase {
        self.supervisor.phase()
    }

    pub fn rails(&self) -> &SimRails {
        self.supervisor.sequencer().rails()
    }

    pub fn leds(&self) -> [u8; 6] {
        self.shared.gauge.levels()
    }

    /// Runs the main loop for `millis`, sampling the button every step.
    pub fn advance(&mut self, millis: u64) {
        let until = self.now.0.saturating_add(millis);
        while self.now.0 < until {
            self.now = Millis::new(self.now.0 + STEP_MS);
            for action in self.detector.sample(self.now, self.button_pressed) {
                if let Some(event) = action.latched() {
                    self.shared.button.post(event);
                }
            }
            self.supervisor.poll(&self.shared, self.now);
        }
    }

    pub fn set_button(&mut self, pressed: bool) {
        self.button_pressed = pressed;
    }

    pub fn set_battery_mv(&mut self, millivolts: u32) {
        let calibration = self.supervisor.monitor().calibration();
        self.supervisor.monitor_mut().frontend_mut().battery_counts =
            millivolts_to_counts(millivolts, calibration);
    }

    pub fn set_thermistor_counts(&mut self, counts: u16) {
        self.supervisor.monitor_mut().frontend_mut().thermistor_counts = counts;
    }

    pub fn set_load_counts(&mut self, counts: u16) {
        self.supervisor.monitor_mut().frontend_mut().current_counts = counts;
    }

    pub fn calibrate(&mut self) -> Result<u16, CalibrationError<SimFlashError>> {
        self.supervisor.monitor_mut().calibrate(&mut self.calibration)
    }

    /// Pushes UART bytes into the coprocessor and collects its replies.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut replies = Vec::new();
        for &byte in bytes {
            let Some(Ok(command)) = self.decoder.push(byte) else {
                continue;
            };
            let reply = self
                .shared
                .dispatcher(self.board)
                .dispatch(command, self.now)
                .ok()
                .flatten();
            if let Some(value) = reply {
                let mut frame = FrameBuffer::new();
                if write_response(&mut frame, value).is_ok() {
                    replies.extend_from_slice(frame.as_bytes());
                }
            }
        }
        replies
    }

    /// Telemetry records not reported yet.
    pub fn drain_telemetry(&mut self) -> Vec<String> {
        let lines: Vec<(EventId, String)> = self
            .supervisor
            .telemetry()
            .since(self.logged)
            .map(|record| {
                (
                    record.id,
                    format!("[{:>7} ms] {}", record.timestamp.0, record.event),
                )
            })
            .collect();
        if let Some((id, _)) = lines.last() {
            self.logged = Some(*id);
        }
        lines.into_iter().map(|(_, line)| line).collect()
    }

    pub fn telemetry_lines(&self) -> Vec<String> {
        self.supervisor
            .telemetry()
            .oldest_first()
            .map(|record| format!("#{:<3} [{:>7} ms] {}", record.id, record.timestamp.0, record.event))
            .collect()
    }

    pub fn status_lines(&self) -> Vec<String> {
        let snapshot = self.supervisor.snapshot(&self.shared, self.now);
        let formatter = StatusFormatter::new(&snapshot);
        let mut power = String::new();
        let mut battery = String::new();
        let mut gauge = String::new();
        // Writing into a String cannot fail.
        let _ = formatter.write_power_line(&mut power);
        let _ = formatter.write_battery_line(&mut battery);
        let _ = formatter.write_gauge_line(&mut gauge);
        vec![power, battery, gauge]
    }
}

/// Host side of the simulated UART.
struct WireLink<'a> {
    board: &'a mut SimBoard,
    rx: VecDeque<u8>,
}

impl HostLink for WireLink<'_> {
    type Error = Infallible;

    fn discard_input(&mut self) -> Result<(), Infallible> {
        self.rx.clear();
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Infallible> {
        let replies = self.board.receive(bytes);
        self.rx.extend(replies);
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Infallible> {
        Ok(self.rx.pop_front())
    }
}

/// Appends every exchanged line to a transcript file.
struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn create(path: &Path) -> io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# battery coprocessor emulator transcript")?;
        Ok(Self { writer })
    }

    fn append(&mut self, now: Millis, role: &str, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{:>7} ms] {role} {line}", now.0)?;
        self.writer.flush()
    }
}

pub struct Session {
    board: SimBoard,
    transcript: Option<TranscriptLogger>,
    color: bool,
    boot_log: Vec<String>,
}

impl Session {
    pub fn new(options: BoardOptions, transcript: Option<&Path>, color: bool) -> io::Result<Self> {
        let mut board =
            SimBoard::boot(options).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let boot_log = board.drain_telemetry();
        let transcript = transcript.map(TranscriptLogger::create).transpose()?;
        Ok(Self {
            board,
            transcript,
            color,
            boot_log,
        })
    }

    /// Telemetry recorded while the simulated board booted.
    pub fn boot_log(&self) -> &[String] {
        &self.boot_log
    }

    #[cfg(test)]
    pub fn board(&self) -> &SimBoard {
        &self.board
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append(self.board.now(), ">", trimmed)?;
        }

        let lines = match self.execute(trimmed) {
            Ok(lines) => lines,
            Err(message) => vec![self.paint(&format!("ERR {message}"), Color::Red)],
        };

        if let Some(transcript) = self.transcript.as_mut() {
            for output in &lines {
                transcript.append(self.board.now(), "<", output)?;
            }
        }
        Ok(lines)
    }

    fn execute(&mut self, line: &str) -> Result<Vec<String>, String> {
        if line.starts_with('#') {
            let mut bytes = line.as_bytes().to_vec();
            bytes.push(b'\n');
            let replies = self.board.receive(&bytes);
            let mut lines: Vec<String> = String::from_utf8_lossy(&replies)
                .lines()
                .map(|reply| self.paint(reply, Color::Green))
                .collect();
            lines.extend(self.events());
            return Ok(lines);
        }

        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
        match keyword.as_str() {
            "help" => Ok(help_lines()),
            "advance" => {
                let millis = parse_number(words.next(), "milliseconds")?;
                self.board.advance(millis);
                let mut lines = self.events();
                lines.push(self.phase_line());
                Ok(lines)
            }
            "battery" => {
                let millivolts = parse_number(words.next(), "millivolts")?;
                self.board
                    .set_battery_mv(u32::try_from(millivolts).map_err(|err| err.to_string())?);
                Ok(vec![format!("battery input set to {millivolts} mV")])
            }
            "load" => {
                let milliamps = parse_number(words.next(), "milliamps")?;
                let counts = load_counts(self.board.board, milliamps);
                self.board.set_load_counts(counts);
                Ok(vec![format!("load current set to ~{milliamps} mA")])
            }
            "thermistor" => {
                let counts = parse_number(words.next(), "ADC counts")?;
                let counts = u16::try_from(counts.min(u64::from(ADC_FULL_SCALE)))
                    .map_err(|err| err.to_string())?;
                self.board.set_thermistor_counts(counts);
                Ok(vec![format!("thermistor input set to {counts} counts")])
            }
            "click" => Ok(self.press(&[120])),
            "double" => Ok(self.press(&[100, 100])),
            "hold" => {
                let millis = parse_number(words.next(), "milliseconds")?;
                Ok(self.press(&[millis]))
            }
            "calibrate" => match self.board.calibrate() {
                Ok(counts) => Ok(vec![format!("calibration stored: {counts} counts at 24 V")]),
                Err(err) => Err(err.to_string()),
            },
            "query" => self.query(words.next(), words.next()),
            "status" => Ok(self.board.status_lines()),
            "leds" => Ok(vec![self.render_leds()]),
            "log" => Ok(self.board.telemetry_lines()),
            other => Err(format!("unknown command `{other}` (try `help`)")),
        }
    }

    fn query(&mut self, opcode: Option<&str>, argument: Option<&str>) -> Result<Vec<String>, String> {
        let code = opcode
            .and_then(|text| text.bytes().next())
            .ok_or_else(|| "expected an opcode character".to_string())?;
        let opcode = Opcode::from_byte(code.to_ascii_uppercase())
            .ok_or_else(|| format!("unknown opcode `{}`", char::from(code)))?;
        let argument = match argument {
            Some(text) => text.parse::<i32>().map_err(|err| err.to_string())?,
            None => 0,
        };

        let mut client = CommandClient::new(WireLink {
            board: &mut self.board,
            rx: VecDeque::new(),
        });
        client
            .send(Command::with_argument(opcode, argument))
            .map_err(describe_client_error)?;
        let reply = client.poll_response().map_err(describe_client_error)?;

        let mut lines = vec![match reply {
            Some(value) => self.paint(&format!("{opcode} -> {value}"), Color::Green),
            None => format!("{opcode} sent"),
        }];
        lines.extend(self.events());
        Ok(lines)
    }

    fn press(&mut self, holds: &[u64]) -> Vec<String> {
        for &hold in holds {
            self.board.set_button(true);
            self.board.advance(hold);
            self.board.set_button(false);
            self.board.advance(80);
        }
        let mut lines = self.events();
        lines.push(format!("button released at {} ms", self.board.now().0));
        lines
    }

    fn events(&mut self) -> Vec<String> {
        self.board
            .drain_telemetry()
            .into_iter()
            .map(|line| self.paint(&line, Color::Yellow))
            .collect()
    }

    fn phase_line(&self) -> String {
        let rails = self.board.rails();
        format!(
            "t={} ms phase={} self={} load={} host={}",
            self.board.now().0,
            self.board.phase(),
            on_off(rails.self_power),
            on_off(rails.load),
            on_off(rails.host)
        )
    }

    fn render_leds(&self) -> String {
        const SHADES: [char; 5] = [' ', '░', '▒', '▓', '█'];
        let cells: String = self
            .board
            .leds()
            .iter()
            .map(|&level| SHADES[usize::from(level.min(4))])
            .collect();
        format!("[{}]", self.paint(&cells, Color::Green))
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }
}

fn help_lines() -> Vec<String> {
    let mut lines = vec!["Commands:".to_string()];
    lines.extend(HELP_TOPICS.iter().map(|(_, usage)| format!("  {usage}")));
    lines
}

fn parse_number(word: Option<&str>, what: &str) -> Result<u64, String> {
    let word = word.ok_or_else(|| format!("expected {what}"))?;
    word.parse::<u64>()
        .map_err(|err| format!("invalid {what} `{word}`: {err}"))
}

/// ADC counts that produce roughly `milliamps` on this board's sense resistor.
fn load_counts(board: &BoardRevision, milliamps: u64) -> u16 {
    let counts = milliamps * u64::from(board.current_sense_ohms) * u64::from(ADC_FULL_SCALE)
        / (u64::from(ADC_REFERENCE_MV) * 10_000);
    u16::try_from(counts.min(u64::from(ADC_FULL_SCALE))).unwrap_or(ADC_FULL_SCALE)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn describe_client_error(error: ClientError<Infallible>) -> String {
    match error {
        ClientError::Link(never) => match never {},
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(BoardOptions::default(), None, false).expect("session")
    }

    #[test]
    fn raw_frames_get_wire_replies() {
        let mut session = session();
        let lines = session.handle_command("### A").expect("io");
        assert_eq!(lines, vec!["### 1".to_string()]);
    }

    #[test]
    fn boot_events_are_kept_out_of_command_output() {
        let session = session();
        assert_eq!(session.boot_log().len(), 2);
        assert!(session.boot_log()[0].contains("battery"));
    }

    #[test]
    fn query_round_trips_through_the_client() {
        let mut session = session();
        let lines = session.handle_command("query h").expect("io");
        assert_eq!(lines[0], "GET_HW_REVISION -> 3");
    }

    #[test]
    fn advance_reaches_active_phase() {
        let mut session = session();
        session.handle_command("advance 2000").expect("io");
        assert_eq!(session.board().phase(), PowerPhase::Active);
        assert!(session.board().rails().load);
    }

    #[test]
    fn click_is_latched_for_the_host() {
        let mut session = session();
        session.handle_command("click").expect("io");
        let lines = session.handle_command("### B").expect("io");
        assert_eq!(lines, vec!["### 1".to_string()]);
    }

    #[test]
    fn calibration_survives_in_flash() {
        let mut session = session();
        let lines = session.handle_command("calibrate").expect("io");
        assert!(lines[0].starts_with("calibration stored"));
        let stored = effective_calibration(&mut session.board.calibration);
        assert_eq!(stored, session.board.supervisor.monitor().calibration());
    }

    #[test]
    fn thermistor_reading_reaches_the_host_after_the_next_sample() {
        let mut session = session();
        assert_eq!(session.handle_command("query c").expect("io")[0], "GET_TEMPERATURE -> 25");
        session.handle_command("thermistor 4095").expect("io");
        session.handle_command("advance 1000").expect("io");
        assert_eq!(session.handle_command("query c").expect("io")[0], "GET_TEMPERATURE -> -273");
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut session = session();
        let lines = session.handle_command("frobnicate").expect("io");
        assert!(lines[0].starts_with("ERR unknown command"));
    }
}
