//! DMA transfer management
//!
//! One bulk transfer per data command: the channel is fully reset, staged
//! with a mode/direction-specific plan against the bounce buffer, and
//! enabled; receives additionally start the controller's data state machine
//! once the channel is ready to drain the FIFO. The engine disables the
//! channel again after the transfer's drain step.

use crate::backend::{DmaBurst, DmaChannel, DmaDirection, DmaTransferConfig, DmaWidth, HostController};
use crate::command::{TransferDirection, TransferMode};

/// Builds the channel programming for one transfer.
///
/// Block transfers move 32-bit words with 4-beat bursts on both sides.
/// Stream transfers narrow the memory side to bytes; stream writes keep a
/// 4-beat peripheral burst to stay ahead of the transmit FIFO, stream reads
/// fall back to single beats on both sides.
pub fn transfer_config(
    direction: TransferDirection,
    mode: TransferMode,
    length: u32,
) -> DmaTransferConfig {
    let (memory_width, memory_burst, peripheral_burst) = match (mode, direction) {
        (TransferMode::Block, _) => (DmaWidth::Bits32, DmaBurst::Beats4, DmaBurst::Beats4),
        (TransferMode::Stream, TransferDirection::ToCard) => {
            (DmaWidth::Bits8, DmaBurst::Single, DmaBurst::Beats4)
        }
        (TransferMode::Stream, TransferDirection::FromCard) => {
            (DmaWidth::Bits8, DmaBurst::Single, DmaBurst::Single)
        }
    };
    DmaTransferConfig {
        direction: match direction {
            TransferDirection::ToCard => DmaDirection::MemoryToPeripheral,
            TransferDirection::FromCard => DmaDirection::PeripheralToMemory,
        },
        length,
        memory_width,
        peripheral_width: DmaWidth::Bits32,
        memory_burst,
        peripheral_burst,
        memory_increment: true,
        peripheral_increment: false,
    }
}

/// Resets and arms the channel for one transfer over `bounce`.
///
/// The reset runs unconditionally so a previous command's wedged transfer
/// can never bleed into this one. For receives the data state machine is
/// enabled only after the channel is, so the FIFO has a drain before the
/// first word arrives.
pub(crate) fn arm<C: HostController, D: DmaChannel>(
    controller: &C,
    channel: &mut D,
    direction: TransferDirection,
    mode: TransferMode,
    bounce: &mut [u8],
) {
    channel.clear_transfer_flags();
    channel.disable();
    channel.deinit();
    controller.set_dma_handshake(true);
    let config = transfer_config(direction, mode, bounce.len() as u32);
    match direction {
        TransferDirection::ToCard => channel.stage_write(&config, bounce),
        TransferDirection::FromCard => channel.stage_read(&config, bounce),
    }
    channel.enable();
    if direction == TransferDirection::FromCard {
        controller.set_data_state_machine(true);
    }
}

/// Releases the channel after a data command's drain step.
pub(crate) fn release<D: DmaChannel>(channel: &mut D) {
    channel.disable();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_transfers_use_wide_bursts() {
        for direction in [TransferDirection::ToCard, TransferDirection::FromCard] {
            let config = transfer_config(direction, TransferMode::Block, 512);
            assert_eq!(config.memory_width, DmaWidth::Bits32);
            assert_eq!(config.peripheral_width, DmaWidth::Bits32);
            assert_eq!(config.memory_burst, DmaBurst::Beats4);
            assert_eq!(config.peripheral_burst, DmaBurst::Beats4);
            assert!(config.memory_increment);
            assert!(!config.peripheral_increment);
        }
    }

    #[test]
    fn stream_writes_narrow_memory_and_keep_peripheral_burst() {
        let config = transfer_config(TransferDirection::ToCard, TransferMode::Stream, 72);
        assert_eq!(config.direction, DmaDirection::MemoryToPeripheral);
        assert_eq!(config.memory_width, DmaWidth::Bits8);
        assert_eq!(config.memory_burst, DmaBurst::Single);
        assert_eq!(config.peripheral_burst, DmaBurst::Beats4);
        assert_eq!(config.length, 72);
    }

    #[test]
    fn stream_reads_single_beat_both_sides() {
        let config = transfer_config(TransferDirection::FromCard, TransferMode::Stream, 64);
        assert_eq!(config.direction, DmaDirection::PeripheralToMemory);
        assert_eq!(config.memory_width, DmaWidth::Bits8);
        assert_eq!(config.memory_burst, DmaBurst::Single);
        assert_eq!(config.peripheral_burst, DmaBurst::Single);
    }
}
