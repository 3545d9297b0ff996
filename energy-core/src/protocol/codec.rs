//! Wire codec for `### <opcode> [argument]\n` frames.
//!
//! Decoding is streaming: bytes are pushed one at a time from the UART
//! receive path and a [`Command`] pops out whenever a newline terminates a
//! well-formed frame. Noise before the preamble is skipped, and anything
//! that fails to parse is discarded up to the next newline.

use core::fmt::{self, Write as _};

use heapless::Vec;
use winnow::ascii::{dec_int, space0};
use winnow::combinator::{opt, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{any, literal, take_until};

use super::opcode::Opcode;

/// Frame start marker shared by commands and responses.
pub const PREAMBLE: &str = "### ";

/// Longest line the decoder buffers before declaring an overflow.
pub const MAX_FRAME_LEN: usize = 32;

/// Formatted frame storage sized for the longest command or response.
pub type FrameBuffer = heapless::String<MAX_FRAME_LEN>;

/// Decoded command frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    /// Numeric argument, `0` when the opcode takes none or it was missing.
    pub argument: i32,
}

impl Command {
    #[must_use]
    pub const fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            argument: 0,
        }
    }

    #[must_use]
    pub const fn with_argument(opcode: Opcode, argument: i32) -> Self {
        Self { opcode, argument }
    }
}

/// Reasons a buffered line was dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    MissingPreamble,
    MissingOpcode,
    UnknownOpcode(u8),
    MissingValue,
    Overflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::MissingPreamble => f.write_str("missing preamble"),
            FrameError::MissingOpcode => f.write_str("missing opcode"),
            FrameError::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{byte:02x}"),
            FrameError::MissingValue => f.write_str("missing response value"),
            FrameError::Overflow => write!(f, "frame longer than {MAX_FRAME_LEN} bytes"),
        }
    }
}

/// Streaming line decoder for the receive path.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    line: Vec<u8, MAX_FRAME_LEN>,
    overflowed: bool,
}

impl FrameDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line: Vec::new(),
            overflowed: false,
        }
    }

    /// Pushes one received byte.
    ///
    /// Returns `Some` only when `byte` terminates a line: the decoded command
    /// or the reason the line was dropped.
    pub fn push(&mut self, byte: u8) -> Option<Result<Command, FrameError>> {
        if byte == b'\n' {
            let result = if self.overflowed {
                Err(FrameError::Overflow)
            } else if self.line.is_empty() {
                return None;
            } else {
                parse_frame(&self.line)
            };
            self.line.clear();
            self.overflowed = false;
            return Some(result);
        }

        if self.overflowed || (self.line.is_empty() && byte != b'#') {
            return None;
        }

        if self.line.push(byte).is_err() {
            self.line.clear();
            self.overflowed = true;
        }
        None
    }

    /// Drops any partially received line.
    pub fn reset(&mut self) {
        self.line.clear();
        self.overflowed = false;
    }
}

fn preamble(input: &mut &[u8]) -> Result<(), ContextError> {
    (
        take_until(0.., PREAMBLE.as_bytes()),
        literal(PREAMBLE.as_bytes()),
    )
        .void()
        .parse_next(input)
}

fn argument(input: &mut &[u8]) -> Result<i32, ContextError> {
    preceded(space0, opt(dec_int))
        .map(|value: Option<i32>| value.unwrap_or(0))
        .parse_next(input)
}

/// Parses one complete line (without the trailing newline).
pub fn parse_frame(line: &[u8]) -> Result<Command, FrameError> {
    let mut input = line;
    preamble
        .parse_next(&mut input)
        .map_err(|_| FrameError::MissingPreamble)?;
    let code = any::<_, ContextError>
        .parse_next(&mut input)
        .map_err(|_| FrameError::MissingOpcode)?;
    let opcode = Opcode::from_byte(code).ok_or(FrameError::UnknownOpcode(code))?;

    if !opcode.has_argument() {
        return Ok(Command::new(opcode));
    }

    let value = argument.parse_next(&mut input).unwrap_or(0);
    Ok(Command::with_argument(opcode, value))
}

/// Parses a response line received by the host.
pub fn parse_response(line: &[u8]) -> Result<i32, FrameError> {
    let mut input = line;
    preamble
        .parse_next(&mut input)
        .map_err(|_| FrameError::MissingPreamble)?;
    space0::<_, ContextError>
        .parse_next(&mut input)
        .map_err(|_| FrameError::MissingValue)?;
    dec_int::<_, i32, ContextError>
        .parse_next(&mut input)
        .map_err(|_| FrameError::MissingValue)
}

/// Writes a command frame the way the host emits it.
pub fn write_command<W: fmt::Write>(out: &mut W, command: Command) -> fmt::Result {
    out.write_str(PREAMBLE)?;
    out.write_char(char::from(command.opcode.as_byte()))?;
    if command.opcode.has_argument() {
        write!(out, " {}", command.argument)?;
    }
    out.write_char('\n')
}

/// Writes a response frame carrying `value`.
pub fn write_response<W: fmt::Write>(out: &mut W, value: i32) -> fmt::Result {
    writeln!(out, "{PREAMBLE}{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode::ALL_OPCODES;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Result<Command, FrameError>, 8> {
        let mut results = Vec::new();
        for &byte in bytes {
            if let Some(result) = decoder.push(byte) {
                results.push(result).expect("test capacity");
            }
        }
        results
    }

    #[test]
    fn parses_query_without_argument() {
        assert_eq!(
            parse_frame(b"### V"),
            Ok(Command::new(Opcode::GetBatteryVoltage))
        );
    }

    #[test]
    fn parses_packed_led_argument() {
        assert_eq!(
            parse_frame(b"### D 444000"),
            Ok(Command::with_argument(Opcode::SetLeds, 444_000))
        );
    }

    #[test]
    fn parses_negative_argument() {
        assert_eq!(
            parse_frame(b"### E -5"),
            Ok(Command::with_argument(Opcode::EnterCriticalSection, -5))
        );
    }

    #[test]
    fn missing_argument_defaults_to_zero() {
        assert_eq!(
            parse_frame(b"### P"),
            Ok(Command::with_argument(Opcode::SetLoadSwitch, 0))
        );
        assert_eq!(
            parse_frame(b"### G abc"),
            Ok(Command::with_argument(Opcode::SetLedGauge, 0))
        );
    }

    #[test]
    fn argument_on_plain_opcode_is_ignored() {
        assert_eq!(parse_frame(b"### S 12"), Ok(Command::new(Opcode::Shutdown)));
    }

    #[test]
    fn skips_noise_before_preamble() {
        assert_eq!(
            parse_frame(b"#x## ### %"),
            Ok(Command::new(Opcode::GetBatteryPercentage))
        );
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert_eq!(parse_frame(b"### z"), Err(FrameError::UnknownOpcode(b'z')));
    }

    #[test]
    fn rejects_line_without_preamble() {
        assert_eq!(parse_frame(b"## V"), Err(FrameError::MissingPreamble));
        assert_eq!(parse_frame(b"### "), Err(FrameError::MissingOpcode));
    }

    #[test]
    fn decoder_resynchronizes_after_garbage() {
        let mut decoder = FrameDecoder::new();
        let results = decode_all(&mut decoder, b"garbage\n### ?\n\n### 3 9600\r\n");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(FrameError::UnknownOpcode(b'?')));
        assert_eq!(
            results[1],
            Ok(Command::with_argument(Opcode::SetBatteryVoltage(3), 9_600))
        );
    }

    #[test]
    fn decoder_drops_overlong_line_then_recovers() {
        let mut decoder = FrameDecoder::new();
        let mut stream: Vec<u8, 96> = Vec::new();
        stream.extend_from_slice(b"### D ").expect("fits");
        for _ in 0..MAX_FRAME_LEN {
            stream.push(b'1').expect("fits");
        }
        stream.extend_from_slice(b"\n### B\n").expect("fits");

        let results = decode_all(&mut decoder, &stream);
        assert_eq!(
            results.as_slice(),
            &[
                Err(FrameError::Overflow),
                Ok(Command::new(Opcode::GetButtonEvent))
            ]
        );
    }

    #[test]
    fn encoded_command_decodes_to_itself() {
        let mut frame = FrameBuffer::new();
        write_command(&mut frame, Command::with_argument(Opcode::EnterCriticalSection, 2_500))
            .expect("fits");
        assert_eq!(frame.as_str(), "### E 2500\n");

        let mut decoder = FrameDecoder::new();
        for opcode in ALL_OPCODES.into_iter().filter(|opcode| opcode.has_argument()) {
            for argument in [i32::MIN, -1, 0, 444_000, i32::MAX] {
                let command = Command::with_argument(opcode, argument);
                let mut frame = FrameBuffer::new();
                write_command(&mut frame, command).expect("fits");
                let results = decode_all(&mut decoder, frame.as_bytes());
                assert_eq!(results.as_slice(), &[Ok(command)], "{}", frame.trim_end());
            }
        }
    }

    #[test]
    fn response_round_trip() {
        let mut frame = FrameBuffer::new();
        write_response(&mut frame, -1).expect("fits");
        assert_eq!(frame.as_str(), "### -1\n");
        assert_eq!(parse_response(frame.trim_end().as_bytes()), Ok(-1));
        assert_eq!(parse_response(b"### "), Err(FrameError::MissingValue));
    }
}
