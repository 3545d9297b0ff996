#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Build-time board selection.

use energy_core::config::{BOARD_REVISIONS, BoardRevision, DEFAULT_BOARD_REVISION};

/// Revision declared through the `BOARD_REVISION` environment variable.
pub const BOARD_REVISION: u8 = match option_env!("BOARD_REVISION") {
    Some(text) => parse_revision(text),
    None => DEFAULT_BOARD_REVISION,
};

/// Single decimal digit; anything else maps to revision 0, which no board uses.
const fn parse_revision(text: &str) -> u8 {
    match text.as_bytes() {
        [digit @ b'0'..=b'9'] => *digit - b'0',
        _ => 0,
    }
}

/// Board description for this build, falling back to the newest revision.
pub fn board() -> &'static BoardRevision {
    BoardRevision::lookup(BOARD_REVISION).unwrap_or(&BOARD_REVISIONS[BOARD_REVISIONS.len() - 1])
}
