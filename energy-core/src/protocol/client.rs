//! Host-side command client.
//!
//! The link has no request identifiers, so a late reply to an earlier query
//! would be mistaken for the answer to the next one. The client therefore
//! discards everything still sitting in the receive path right before it
//! sends a command.

use core::fmt;

use heapless::Vec;

use super::codec::{self, Command, FrameBuffer, FrameError, MAX_FRAME_LEN};

/// Byte transport between the host and the coprocessor.
pub trait HostLink {
    type Error;

    /// Drops every received byte that has not been read yet.
    fn discard_input(&mut self) -> Result<(), Self::Error>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Reads one byte if one is available without waiting.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error>;
}

/// Errors surfaced by [`CommandClient`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientError<E> {
    Link(E),
    Encode,
    Frame(FrameError),
}

impl<E> From<FrameError> for ClientError<E> {
    fn from(error: FrameError) -> Self {
        Self::Frame(error)
    }
}

impl<E: fmt::Display> fmt::Display for ClientError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Link(error) => write!(f, "link error: {error}"),
            ClientError::Encode => f.write_str("command does not fit a frame"),
            ClientError::Frame(error) => write!(f, "bad response: {error}"),
        }
    }
}

/// Sends commands and collects numeric responses over a [`HostLink`].
pub struct CommandClient<L> {
    link: L,
    line: Vec<u8, MAX_FRAME_LEN>,
}

impl<L> CommandClient<L>
where
    L: HostLink,
{
    #[must_use]
    pub fn new(link: L) -> Self {
        Self {
            link,
            line: Vec::new(),
        }
    }

    /// Discards pending input, then writes `command`.
    pub fn send(&mut self, command: Command) -> Result<(), ClientError<L::Error>> {
        self.link.discard_input().map_err(ClientError::Link)?;
        self.line.clear();

        let mut frame = FrameBuffer::new();
        codec::write_command(&mut frame, command).map_err(|_| ClientError::Encode)?;
        self.link
            .write_all(frame.as_bytes())
            .map_err(ClientError::Link)
    }

    /// Drains available bytes and returns a response once a full line arrived.
    pub fn poll_response(&mut self) -> Result<Option<i32>, ClientError<L::Error>> {
        while let Some(byte) = self.link.read_byte().map_err(ClientError::Link)? {
            match byte {
                b'\n' => {
                    let parsed = codec::parse_response(&self.line);
                    self.line.clear();
                    return Ok(Some(parsed?));
                }
                b'\r' => {}
                other => {
                    if self.line.push(other).is_err() {
                        self.line.clear();
                        return Err(ClientError::Frame(FrameError::Overflow));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}

#[cfg(test)]
mod tests {
    use heapless::Deque;

    use super::*;
    use crate::protocol::Opcode;

    #[derive(Default)]
    struct MockLink {
        rx: Deque<u8, 64>,
        tx: Vec<u8, 64>,
        discards: usize,
    }

    impl MockLink {
        fn inject(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                self.rx.push_back(byte).expect("test capacity");
            }
        }
    }

    impl HostLink for MockLink {
        type Error = ();

        fn discard_input(&mut self) -> Result<(), Self::Error> {
            self.rx.clear();
            self.discards += 1;
            Ok(())
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.tx.extend_from_slice(bytes).map_err(|_| ())
        }

        fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
            Ok(self.rx.pop_front())
        }
    }

    #[test]
    fn stale_reply_is_discarded_before_sending() {
        let mut link = MockLink::default();
        link.inject(b"### 77\r\n");
        let mut client = CommandClient::new(link);

        client
            .send(Command::new(Opcode::GetBatteryVoltage))
            .expect("send");
        assert_eq!(client.poll_response(), Ok(None));

        let link = client.link_mut();
        assert_eq!(link.discards, 1);
        assert_eq!(link.tx.as_slice(), b"### V\n");

        link.inject(b"### 11840\r\n");
        assert_eq!(client.poll_response(), Ok(Some(11_840)));
    }

    #[test]
    fn command_arguments_are_written() {
        let mut client = CommandClient::new(MockLink::default());
        client
            .send(Command::with_argument(Opcode::SetLedGauge, 55))
            .expect("send");
        assert_eq!(client.into_inner().tx.as_slice(), b"### G 55\n");
    }

    #[test]
    fn malformed_reply_surfaces_frame_error() {
        let mut client = CommandClient::new(MockLink::default());
        client.link_mut().inject(b"noise\n");
        assert_eq!(
            client.poll_response(),
            Err(ClientError::Frame(FrameError::MissingPreamble))
        );
    }
}
