//! Host link protocol: `### <opcode>[ <argument>]\n` frames over the UART.

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod opcode;

pub use self::codec::{Command, FrameDecoder, FrameError};
pub use self::dispatch::{DispatchError, Dispatcher};
pub use self::opcode::Opcode;
