//! Controller status word and data-path field encodings
//!
//! Bit positions follow the SDIO host IP found on GD32/STM32-class parts;
//! a [`HostController`](crate::backend::HostController) implementation maps
//! these onto its real status and interrupt-enable registers one-to-one.

use bitflags::bitflags;

bitflags! {
    /// Controller status flags, shared with the interrupt-enable mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// Command response CRC check failed.
        const CCRCERR = 1 << 0;
        /// Data block CRC check failed.
        const DTCRCERR = 1 << 1;
        /// No response within the command timeout.
        const CMDTMOUT = 1 << 2;
        /// Data timeout expired.
        const DTTMOUT = 1 << 3;
        /// Transmit FIFO underran.
        const TXURE = 1 << 4;
        /// Receive FIFO overran.
        const RXORE = 1 << 5;
        /// Command response received.
        const CMDRECV = 1 << 6;
        /// Command sent, no response expected.
        const CMDSEND = 1 << 7;
        /// Data transfer finished.
        const DTEND = 1 << 8;
        /// Start bit missing on a data lane.
        const STBITE = 1 << 9;
        /// Data block sent/received.
        const DTBLKEND = 1 << 10;
        /// Command state machine active.
        const CMDRUN = 1 << 11;
        /// Data transmit in progress.
        const TXRUN = 1 << 12;
        /// Data receive in progress.
        const RXRUN = 1 << 13;
        /// SD I/O card interrupt.
        const SDIOINT = 1 << 22;

        /// Every fault the engine classifies.
        const ERRORS = Self::CCRCERR.bits()
            | Self::DTCRCERR.bits()
            | Self::CMDTMOUT.bits()
            | Self::DTTMOUT.bits()
            | Self::TXURE.bits()
            | Self::RXORE.bits();
        /// Data path still moving bytes.
        const TRANSFER_RUNNING = Self::TXRUN.bits() | Self::RXRUN.bits();
    }
}

/// Data timeout programmed for every transfer, in bus clock cycles.
pub const DATA_TIMEOUT_CYCLES: u32 = 0xffff_ffff;

/// Encodes a block size into the hardware's log2-coded field.
///
/// The field only represents power-of-two sizes up to 16384 bytes; anything
/// else is unencodable and must be rejected before reaching the data path.
pub fn block_size_code(block_size: u32) -> Option<u8> {
    if block_size.is_power_of_two() && block_size <= 16384 {
        Some(block_size.trailing_zeros() as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mask_covers_the_six_fault_bits() {
        assert_eq!(Status::ERRORS.bits(), 0x3f);
        assert!(Status::ERRORS.contains(Status::CCRCERR));
        assert!(Status::ERRORS.contains(Status::RXORE));
        assert!(!Status::ERRORS.contains(Status::CMDRECV));
    }

    #[test]
    fn block_size_codes() {
        assert_eq!(block_size_code(1), Some(0));
        assert_eq!(block_size_code(512), Some(9));
        assert_eq!(block_size_code(16384), Some(14));
        assert_eq!(block_size_code(0), None);
        assert_eq!(block_size_code(3), None);
        assert_eq!(block_size_code(32768), None);
    }
}
