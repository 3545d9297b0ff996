//! Persistent battery-voltage calibration.
//!
//! The calibration value is the raw ADC count observed with exactly
//! [`CALIBRATION_REFERENCE_MV`] on the battery input. An all-ones value means
//! the board was never calibrated.

use core::fmt;

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Battery voltage applied while recording the calibration count.
pub const CALIBRATION_REFERENCE_MV: u32 = 24_000;

/// Erased-storage pattern.
pub const UNPROGRAMMED: u16 = 0xFFFF;

/// Nominal count for the 31.6 kΩ / 270 kΩ divider referenced to 3.3 V:
/// `24000 * 316 / (316 + 2700) * 4095 / 3300`.
pub const DEFAULT_CALIBRATION: u16 = 3119;

/// Non-volatile home of the calibration count.
pub trait CalibrationStore {
    type Error;

    /// Returns the stored count, `None` when unprogrammed or unreadable.
    fn read(&mut self) -> Option<u16>;

    fn write(&mut self, counts: u16) -> Result<(), Self::Error>;
}

/// Stored calibration, or the nominal divider value when none is usable.
pub fn effective_calibration<S: CalibrationStore + ?Sized>(store: &mut S) -> u16 {
    store
        .read()
        .filter(|&counts| counts != 0 && counts != UNPROGRAMMED)
        .unwrap_or(DEFAULT_CALIBRATION)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CalibrationError<E> {
    Flash(E),
    /// The flash write granularity does not fit the record buffer.
    UnsupportedGranularity(usize),
    /// Zero and all-ones cannot be stored as real calibration counts.
    InvalidCounts(u16),
}

impl<E: fmt::Debug> fmt::Display for CalibrationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::Flash(error) => write!(f, "flash error: {error:?}"),
            CalibrationError::UnsupportedGranularity(size) => {
                write!(f, "unsupported flash write size {size}")
            }
            CalibrationError::InvalidCounts(counts) => {
                write!(f, "refusing to store calibration {counts:#06x}")
            }
        }
    }
}

const RECORD_BUFFER: usize = 8;

/// Calibration record kept in a dedicated NOR flash page.
pub struct FlashCalibration<F> {
    flash: F,
    offset: u32,
}

impl<F> FlashCalibration<F>
where
    F: NorFlash,
{
    /// `offset` must sit in a page used for nothing else.
    #[must_use]
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn page_bounds(&self) -> (u32, u32) {
        let erase = u32::try_from(F::ERASE_SIZE).unwrap_or(u32::MAX);
        let start = self.offset - self.offset % erase;
        (start, start.saturating_add(erase))
    }
}

impl<F> CalibrationStore for FlashCalibration<F>
where
    F: NorFlash,
{
    type Error = CalibrationError<F::Error>;

    fn read(&mut self) -> Option<u16> {
        let mut bytes = [0u8; 2];
        self.flash.read(self.offset, &mut bytes).ok()?;
        let counts = u16::from_le_bytes(bytes);
        (counts != UNPROGRAMMED).then_some(counts)
    }

    fn write(&mut self, counts: u16) -> Result<(), Self::Error> {
        if counts == 0 || counts == UNPROGRAMMED {
            return Err(CalibrationError::InvalidCounts(counts));
        }
        let length = F::WRITE_SIZE.max(2);
        if length > RECORD_BUFFER || RECORD_BUFFER % length != 0 {
            return Err(CalibrationError::UnsupportedGranularity(F::WRITE_SIZE));
        }

        let mut record = [0xFFu8; RECORD_BUFFER];
        record[..2].copy_from_slice(&counts.to_le_bytes());

        let (start, end) = self.page_bounds();
        self.flash
            .erase(start, end)
            .map_err(CalibrationError::Flash)?;
        self.flash
            .write(self.offset, &record[..length])
            .map_err(CalibrationError::Flash)
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::nor_flash::{ErrorType, NorFlashErrorKind};

    use super::*;

    const PAGE: usize = 64;

    struct RamFlash {
        cells: [u8; PAGE * 2],
        erases: usize,
    }

    impl RamFlash {
        fn erased() -> Self {
            Self {
                cells: [0xFF; PAGE * 2],
                erases: 0,
            }
        }
    }

    impl ErrorType for RamFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for RamFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let source = self
                .cells
                .get(start..start + bytes.len())
                .ok_or(NorFlashErrorKind::OutOfBounds)?;
            bytes.copy_from_slice(source);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.cells.len()
        }
    }

    impl NorFlash for RamFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = PAGE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.cells[from as usize..to as usize].fill(0xFF);
            self.erases += 1;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if bytes.len() % Self::WRITE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let start = offset as usize;
            self.cells[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn default_matches_divider_formula() {
        let nominal = 24_000u32 * 316 / (316 + 2_700) * 4_095 / 3_300;
        assert_eq!(u32::from(DEFAULT_CALIBRATION), nominal);
    }

    #[test]
    fn erased_flash_reads_as_unprogrammed() {
        let mut store = FlashCalibration::new(RamFlash::erased(), PAGE as u32);
        assert_eq!(store.read(), None);
        assert_eq!(effective_calibration(&mut store), DEFAULT_CALIBRATION);
    }

    #[test]
    fn written_value_is_read_back() {
        let mut store = FlashCalibration::new(RamFlash::erased(), PAGE as u32 + 8);
        store.write(3_050).expect("write");
        assert_eq!(store.read(), Some(3_050));
        assert_eq!(effective_calibration(&mut store), 3_050);
        assert_eq!(store.into_inner().erases, 1);
    }

    #[test]
    fn rewrite_only_touches_its_own_page() {
        let mut flash = RamFlash::erased();
        flash.cells[0] = 0x42;
        let mut store = FlashCalibration::new(flash, PAGE as u32);
        store.write(3_000).expect("first write");
        store.write(3_100).expect("second write");
        assert_eq!(store.read(), Some(3_100));
        assert_eq!(store.into_inner().cells[0], 0x42);
    }

    #[test]
    fn rejects_sentinel_values() {
        let mut store = FlashCalibration::new(RamFlash::erased(), 0);
        assert_eq!(
            store.write(UNPROGRAMMED),
            Err(CalibrationError::InvalidCounts(UNPROGRAMMED))
        );
        assert_eq!(store.write(0), Err(CalibrationError::InvalidCounts(0)));
    }
}
