//! Requests, commands and data descriptors exchanged with the card stack

use crate::errors::SdioError;

/// Response form a command expects from the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// No response token follows the command.
    None,
    /// 48-bit response with a valid CRC7 field.
    Short,
    /// 48-bit response whose CRC field is undefined (R3/R4 class); a
    /// response CRC failure is expected and tolerated.
    ShortNoCrc,
    /// 136-bit response, delivered as four 32-bit words.
    Long,
}

/// Response-length selector programmed into the command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    None,
    Short,
    Long,
}

impl ResponseKind {
    pub fn length(self) -> ResponseLength {
        match self {
            ResponseKind::None => ResponseLength::None,
            ResponseKind::Short | ResponseKind::ShortNoCrc => ResponseLength::Short,
            ResponseKind::Long => ResponseLength::Long,
        }
    }

    /// Whether a hardware response-CRC failure should be ignored.
    pub fn tolerates_crc_error(self) -> bool {
        matches!(self, ResponseKind::ShortNoCrc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    ToCard,
    FromCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Fixed-size blocks, hardware CRC per block.
    Block,
    /// Byte stream; single-block writes get a software CRC16 trailer.
    Stream,
}

/// One data phase attached to a command.
///
/// `block_count * block_size` bytes move between `buffer` and the card
/// through the engine's bounce buffer. Stream transfers must be single
/// block; the engine may extend `block_size` by the CRC trailer length on
/// stream writes.
#[derive(Debug)]
pub struct DataDescriptor<'a> {
    pub direction: TransferDirection,
    pub mode: TransferMode,
    pub block_count: u32,
    pub block_size: u32,
    pub buffer: &'a mut [u8],
    /// Result slot, written by the engine.
    pub error: Option<SdioError>,
}

impl<'a> DataDescriptor<'a> {
    pub fn new(
        direction: TransferDirection,
        mode: TransferMode,
        block_count: u32,
        block_size: u32,
        buffer: &'a mut [u8],
    ) -> Self {
        Self {
            direction,
            mode,
            block_count,
            block_size,
            buffer,
            error: None,
        }
    }

    pub fn transfer_len(&self) -> u64 {
        u64::from(self.block_count) * u64::from(self.block_size)
    }
}

/// One bus command with its result slots.
#[derive(Debug)]
pub struct Command<'a> {
    pub opcode: u8,
    pub argument: u32,
    pub response: ResponseKind,
    pub data: Option<DataDescriptor<'a>>,
    /// Result slot, written by the engine.
    pub error: Option<SdioError>,
    /// Response words; only word 0 is valid unless the response is long.
    pub response_words: [u32; 4],
}

impl<'a> Command<'a> {
    pub fn new(opcode: u8, argument: u32, response: ResponseKind) -> Self {
        Self {
            opcode,
            argument,
            response,
            data: None,
            error: None,
            response_words: [0; 4],
        }
    }

    pub fn with_data(mut self, data: DataDescriptor<'a>) -> Self {
        self.data = Some(data);
        self
    }
}

/// An ordered pair of commands: the main transfer and an optional stop.
///
/// The stop command is issued after the main command whether or not the
/// main command succeeded, so multi-block operations are always closed out
/// on the card side.
#[derive(Debug, Default)]
pub struct Request<'a> {
    pub main: Option<Command<'a>>,
    pub stop: Option<Command<'a>>,
}

/// Outcome of [`execute`](crate::engine::SdioHost::execute): `Ok` or the
/// first error recorded across the request's result slots.
pub type RequestResult = Result<(), SdioError>;

impl<'a> Request<'a> {
    pub fn new(main: Command<'a>) -> Self {
        Self {
            main: Some(main),
            stop: None,
        }
    }

    pub fn with_stop(main: Command<'a>, stop: Command<'a>) -> Self {
        Self {
            main: Some(main),
            stop: Some(stop),
        }
    }

    /// First recorded error, in issue order: main command, main data, stop
    /// command, stop data.
    pub fn first_error(&self) -> Option<SdioError> {
        for command in [self.main.as_ref(), self.stop.as_ref()].into_iter().flatten() {
            if let Some(error) = command.error {
                return Some(error);
            }
            if let Some(error) = command.data.as_ref().and_then(|data| data.error) {
                return Some(error);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_kind_maps_to_length() {
        assert_eq!(ResponseKind::None.length(), ResponseLength::None);
        assert_eq!(ResponseKind::Short.length(), ResponseLength::Short);
        assert_eq!(ResponseKind::ShortNoCrc.length(), ResponseLength::Short);
        assert_eq!(ResponseKind::Long.length(), ResponseLength::Long);
        assert!(ResponseKind::ShortNoCrc.tolerates_crc_error());
        assert!(!ResponseKind::Short.tolerates_crc_error());
    }

    #[test]
    fn first_error_prefers_main_command_slot() {
        let mut buffer = [0; 8];
        let mut main = Command::new(18, 0, ResponseKind::Short).with_data(DataDescriptor::new(
            TransferDirection::FromCard,
            TransferMode::Block,
            1,
            8,
            &mut buffer,
        ));
        main.error = Some(SdioError::CommandTimeout {});
        if let Some(data) = main.data.as_mut() {
            data.error = Some(SdioError::DataCrc {});
        }
        let mut stop = Command::new(12, 0, ResponseKind::Short);
        stop.error = Some(SdioError::Busy {});
        let request = Request::with_stop(main, stop);
        assert_eq!(request.first_error(), Some(SdioError::CommandTimeout {}));
    }

    #[test]
    fn first_error_falls_through_to_data_and_stop() {
        let mut request = Request::new(Command::new(0, 0, ResponseKind::None));
        assert_eq!(request.first_error(), None);
        let mut stop = Command::new(12, 0, ResponseKind::Short);
        stop.error = Some(SdioError::Busy {});
        request.stop = Some(stop);
        assert_eq!(request.first_error(), Some(SdioError::Busy {}));
    }
}
