#![no_std]

// Portable logic for the battery coprocessor.
//
// Everything here builds without the standard library so the firmware and the
// host emulator share one implementation; hardware is reached only through
// the traits in `battery`, `gauge` and `power`.

pub mod battery;
pub mod button;
pub mod clock;
pub mod config;
pub mod gauge;
pub mod power;
pub mod protocol;
pub mod status;
pub mod supervisor;
pub mod telemetry;

pub use clock::{MonotonicInstant, Millis};
pub use supervisor::{SharedState, Supervisor};
