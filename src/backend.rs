//! Capability interfaces the engine drives
//!
//! The engine contains no register addresses. Everything hardware-specific
//! sits behind these traits, implemented once per controller variant (and
//! once more by the test suite's scripted mocks). Method granularity
//! mirrors the register-level operations an SDIO host IP exposes, so an
//! implementation is a thin volatile-access shim with no protocol logic.

use crate::bus::{BusWidth, PowerMode};
use crate::command::{ResponseLength, TransferDirection, TransferMode};
use crate::registers::Status;
use fugit::HertzU32;

/// Monotonic instant in microseconds, as produced by a platform timer.
pub type Instant = fugit::TimerInstantU64<1_000_000>;
/// Microsecond span between two [`Instant`]s.
pub type Duration = fugit::TimerDurationU64<1_000_000>;

/// Register-level interface to the bus controller.
///
/// All methods take `&self`: the engine calls into the controller from the
/// request thread and from [`handle_interrupt`](crate::engine::SdioEngine::handle_interrupt)
/// concurrently, exactly as memory-mapped registers are shared on real
/// hardware.
pub trait HostController: Sync {
    /// Current status word.
    fn status(&self) -> Status;
    /// Clears the given status flags.
    fn clear_flags(&self, flags: Status);
    /// Current interrupt-enable mask.
    fn interrupt_mask(&self) -> Status;
    /// Replaces the interrupt-enable mask.
    fn set_interrupt_mask(&self, mask: Status);

    /// Programs opcode, argument and response-length selector into the
    /// command register, with any wait-for-interrupt mode cleared. Does not
    /// start the command state machine.
    fn program_command(&self, opcode: u8, argument: u32, response: ResponseLength);
    /// Starts the command state machine on the programmed command.
    fn start_command(&self);
    /// Reads response word `index` (0..=3); word 0 is the short response.
    fn response_word(&self, index: usize) -> u32;

    /// Programs data timeout, total byte length and the log2 block-size
    /// code. Stream transfers pass a zero code; hardware ignores the field.
    fn configure_data(&self, timeout_cycles: u32, length: u32, block_size_code: u8);
    /// Programs transfer mode and direction.
    fn configure_transfer(&self, mode: TransferMode, direction: TransferDirection);
    /// Starts or stops the data state machine.
    fn set_data_state_machine(&self, enabled: bool);
    /// Opens or closes the controller-side DMA handshake.
    fn set_dma_handshake(&self, enabled: bool);
    /// Sets the SD I/O specific-operation bit in the data-path control.
    fn set_sdio_operation(&self, enabled: bool);

    /// Programs the biased bus clock divider (see
    /// [`clock_divider`](crate::bus::clock_divider)).
    fn set_clock_divider(&self, divider: u16);
    /// Selects the number of driven data lanes.
    fn set_bus_width(&self, width: BusWidth);
    /// Sequences the card power rail.
    fn set_power(&self, mode: PowerMode);
    /// Gates the controller's hardware clock.
    fn set_hardware_clock(&self, enabled: bool);
    /// Gates the bus clock output to the card.
    fn set_bus_clock(&self, enabled: bool);
    /// Clock feeding the controller's divider.
    fn source_clock(&self) -> HertzU32;

    /// Disable/enable cycle of the whole controller block. Used as hard
    /// recovery when the data path wedges.
    fn reset(&self);
}

/// Transfer direction as seen by the DMA controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// Bus width of one DMA beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaWidth {
    Bits8,
    Bits32,
}

/// Beats moved per burst grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaBurst {
    Single,
    Beats4,
}

/// One transfer's channel programming, built by
/// [`transfer_config`](crate::dma::transfer_config).
///
/// The peripheral side always addresses the controller FIFO at a fixed
/// address; priority and FIFO staging are constant for this peripheral and
/// left to the channel implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransferConfig {
    pub direction: DmaDirection,
    /// Transfer length in bytes.
    pub length: u32,
    pub memory_width: DmaWidth,
    pub peripheral_width: DmaWidth,
    pub memory_burst: DmaBurst,
    pub peripheral_burst: DmaBurst,
    pub memory_increment: bool,
    pub peripheral_increment: bool,
}

/// Register-level interface to the DMA channel wired to the controller.
///
/// The engine stages exactly one transfer per data command and guarantees
/// the staged region is untouched between [`enable`](DmaChannel::enable)
/// and the post-completion [`disable`](DmaChannel::disable); an
/// implementation may let hardware access the region for that whole window.
pub trait DmaChannel {
    /// Clears the channel's transfer/error flags.
    fn clear_transfer_flags(&mut self);
    /// Stops the channel.
    fn disable(&mut self);
    /// Returns the channel to its reset configuration.
    fn deinit(&mut self);
    /// Stages a memory-to-peripheral transfer of `source`.
    fn stage_write(&mut self, config: &DmaTransferConfig, source: &[u8]);
    /// Stages a peripheral-to-memory transfer into `destination`.
    fn stage_read(&mut self, config: &DmaTransferConfig, destination: &mut [u8]);
    /// Starts the staged transfer.
    fn enable(&mut self);
}

/// Monotonic time source backing the engine's bounded waits.
pub trait Timebase: Sync {
    fn now(&self) -> Instant;
}

/// Callbacks into the card stack sitting above the engine.
pub trait CardStack: Sync {
    /// A request finished; called after the request lock is released.
    fn request_complete(&self) {}
    /// The card raised its interrupt line; called in interrupt context.
    fn sdio_interrupt(&self) {}
}

/// No-op stack for engines driven without completion callbacks.
impl CardStack for () {}
