//! Errors reported by the SDIO request engine

use snafu::prelude::*;

/// Failure classes recorded in command/data result slots and returned by the
/// request dispatcher.
///
/// Every hardware-reported fault is reduced to one of these before a request
/// returns; the raw status word is only ever logged.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum SdioError {
    #[snafu(display("(SDIO) Bad CRC on command response!"))]
    CommandCrc {},
    #[snafu(display("(SDIO) Timeout waiting for command completion!"))]
    CommandTimeout {},
    #[snafu(display("(SDIO) Bad CRC on data block!"))]
    DataCrc {},
    #[snafu(display("(SDIO) Timeout on data transfer!"))]
    DataTimeout {},
    #[snafu(display("(SDIO) Bus stuck busy or FIFO fault!"))]
    Busy {},
    #[snafu(display("(SDIO) Request rejected before reaching the bus!"))]
    InvalidArgument {},
}
