//! Battery chemistries, cell-count detection and charge percentage.

use core::fmt;

/// Number of voltage breakpoints in a profile (0 = empty, 6 = full).
pub const BREAKPOINT_COUNT: usize = 7;

/// Per-cell LiPo breakpoints in millivolts.
pub const LIPO_CELL_MV: [u32; BREAKPOINT_COUNT] = [3500, 3650, 3700, 3750, 3825, 3950, 4200];

/// Per-cell LiFePO4 breakpoints in millivolts.
pub const LIFE_CELL_MV: [u32; BREAKPOINT_COUNT] = [2920, 3140, 3200, 3220, 3240, 3260, 3600];

/// Headroom above the full-cell voltage accepted during cell detection.
pub const CELL_TOLERANCE_MV: u32 = 50;

/// Pack sizes the detector recognizes. 5 and 6 cells overlap neighbours too
/// much to be told apart and are rejected.
pub const SUPPORTED_CELL_COUNTS: [u8; 4] = [2, 3, 4, 7];

/// Integer weight of one breakpoint interval.
const PERCENT_PER_INTERVAL: u64 = 100 / 6;

/// Breakpoint value meaning "not defined".
pub const UNDEFINED_BREAKPOINT: u32 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Chemistry {
    LiPo,
    LiFe,
    /// Breakpoints supplied by the host over the protocol.
    Custom,
}

impl Chemistry {
    /// Wire code answered to `GET_BATTERY_TYPE`.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            Chemistry::LiPo => 0,
            Chemistry::LiFe => 1,
            Chemistry::Custom => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(Chemistry::LiPo),
            1 => Some(Chemistry::LiFe),
            2 => Some(Chemistry::Custom),
            _ => None,
        }
    }

    /// Resolves the two active-low selector inputs. The first input wins.
    #[must_use]
    pub const fn from_selector(lipo_low: bool, life_low: bool) -> Self {
        if lipo_low {
            Chemistry::LiPo
        } else if life_low {
            Chemistry::LiFe
        } else {
            Chemistry::Custom
        }
    }

    /// Per-cell breakpoint table, `None` for host-defined profiles.
    #[must_use]
    pub const fn cell_table(self) -> Option<&'static [u32; BREAKPOINT_COUNT]> {
        match self {
            Chemistry::LiPo => Some(&LIPO_CELL_MV),
            Chemistry::LiFe => Some(&LIFE_CELL_MV),
            Chemistry::Custom => None,
        }
    }
}

impl fmt::Display for Chemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Chemistry::LiPo => "lipo",
            Chemistry::LiFe => "life",
            Chemistry::Custom => "custom",
        })
    }
}

/// Finds the pack size whose voltage window contains `voltage_mv`.
///
/// A pack of `n` cells matches when `n * cell_min < voltage <= n * (cell_max + 50)`.
/// The smallest matching size wins; `None` means the reading fits no
/// supported pack.
#[must_use]
pub fn find_cell_count(voltage_mv: u32, cell_min_mv: u32, cell_max_mv: u32) -> Option<u8> {
    SUPPORTED_CELL_COUNTS.iter().copied().find(|&cells| {
        let cells = u32::from(cells);
        voltage_mv > cells * cell_min_mv && voltage_mv <= cells * (cell_max_mv + CELL_TOLERANCE_MV)
    })
}

/// Interpolates a charge percentage from `voltage_mv`.
///
/// Requires breakpoints 0 and 6; intermediate breakpoints may be undefined
/// (zero) and are skipped. Each of the six intervals is worth `100 / 6`.
#[must_use]
pub fn percentage(breakpoints: &[u32; BREAKPOINT_COUNT], voltage_mv: u32) -> Option<u8> {
    let empty = breakpoints[0];
    let full = breakpoints[BREAKPOINT_COUNT - 1];
    if empty == UNDEFINED_BREAKPOINT || full == UNDEFINED_BREAKPOINT {
        return None;
    }
    if voltage_mv < empty {
        return Some(0);
    }
    if voltage_mv >= full {
        return Some(100);
    }

    let mut lower = 0;
    while lower < BREAKPOINT_COUNT - 1 {
        let upper = (lower + 1..BREAKPOINT_COUNT)
            .find(|&index| breakpoints[index] != UNDEFINED_BREAKPOINT)?;
        let (low_mv, high_mv) = (breakpoints[lower], breakpoints[upper]);

        if low_mv <= voltage_mv && voltage_mv < high_mv {
            let base = index_u64(lower) * 100 / 6;
            let span = index_u64(upper - lower);
            let step = u64::from(voltage_mv - low_mv) * span * PERCENT_PER_INTERVAL
                / u64::from(high_mv - low_mv);
            return u8::try_from((base + step).min(100)).ok();
        }
        lower = upper;
    }
    None
}

fn index_u64(index: usize) -> u64 {
    u64::try_from(index).unwrap_or(u64::MAX)
}

/// Chemistry plus the pack-level breakpoints derived from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatteryProfile {
    pub chemistry: Chemistry,
    pub breakpoints: [u32; BREAKPOINT_COUNT],
}

impl BatteryProfile {
    /// Profile with every breakpoint undefined.
    #[must_use]
    pub const fn undefined(chemistry: Chemistry) -> Self {
        Self {
            chemistry,
            breakpoints: [UNDEFINED_BREAKPOINT; BREAKPOINT_COUNT],
        }
    }

    /// Scales the chemistry's per-cell table to a pack of `cells`.
    #[must_use]
    pub fn for_pack(chemistry: Chemistry, cells: u8) -> Self {
        let Some(table) = chemistry.cell_table() else {
            return Self::undefined(chemistry);
        };
        let mut breakpoints = [UNDEFINED_BREAKPOINT; BREAKPOINT_COUNT];
        for (slot, per_cell) in breakpoints.iter_mut().zip(table) {
            *slot = per_cell * u32::from(cells);
        }
        Self {
            chemistry,
            breakpoints,
        }
    }

    #[must_use]
    pub fn percentage(&self, voltage_mv: u32) -> Option<u8> {
        percentage(&self.breakpoints, voltage_mv)
    }
}
