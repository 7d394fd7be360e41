//! The bus request engine
//!
//! One [`SdioEngine`] owns one bus: its bounce buffer, its DMA channel and
//! the interrupt-shared completion state. Requests from the card stack are
//! serialized under a per-bus lock, staged through the bounce buffer, driven
//! through the controller's command and data state machines, and completed
//! by [`handle_interrupt`](SdioEngine::handle_interrupt) classifying the
//! status word raised by hardware.
//!
//! The platform's SDIO interrupt vector must call `handle_interrupt`; no
//! other engine entry point is interrupt-safe.

use core::hint;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::backend::{CardStack, DmaChannel, Duration, HostController, Timebase};
use crate::bus::{self, BusConfig, PowerMode};
use crate::command::{
    Command, DataDescriptor, Request, RequestResult, ResponseKind, TransferDirection, TransferMode,
};
use crate::crc;
use crate::dma;
use crate::errors::SdioError;
use crate::registers::{self, Status};
use fugit::HertzU32;
use spin::Mutex;

/// Size of the engine-owned staging buffer all transfers bounce through.
pub const BOUNCE_CAPACITY: usize = 4096;
/// Default bound on the post-transfer TX/RX drain spin.
pub const DEFAULT_DRAIN_SPIN_BUDGET: u32 = 1_000_000;
/// Default completion-wait bound, in milliseconds.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;
/// Default ceiling on the programmed bus clock.
pub const DEFAULT_MAX_CLOCK_HZ: u32 = 24_000_000;

/// Host operations the card stack drives, implemented by [`SdioEngine`].
pub trait SdioHost {
    /// Runs a request to completion, filling its result slots.
    fn execute(&self, request: &mut Request<'_>) -> RequestResult;
    /// Applies a bus operating point.
    fn configure(&self, config: &BusConfig);
    /// Reports whether a card is present in the slot.
    fn detect(&self) -> bool;
    /// Arms or disarms forwarding of the card's interrupt line.
    fn enable_card_interrupt(&self, enabled: bool);
}

/// Tunable engine bounds; the defaults match the reference platform.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long a command may sit unsignaled before it times out.
    pub command_timeout: Duration,
    /// Spin iterations allowed for the data path to go idle after a
    /// transfer before the controller is hard-reset.
    pub drain_spin_budget: u32,
    /// Ceiling applied to requested bus clocks.
    pub max_clock: HertzU32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::millis(DEFAULT_COMMAND_TIMEOUT_MS),
            drain_spin_budget: DEFAULT_DRAIN_SPIN_BUDGET,
            max_clock: HertzU32::from_raw(DEFAULT_MAX_CLOCK_HZ),
        }
    }
}

// Packed pending-command descriptor shared with the interrupt handler.
const PENDING_ACTIVE: u32 = 1 << 0;
const PENDING_HAS_DATA: u32 = 1 << 1;
const PENDING_WRITE: u32 = 1 << 2;
const PENDING_NO_RESPONSE: u32 = 1 << 3;

fn pending_descriptor(command: &Command<'_>) -> u32 {
    let mut bits = PENDING_ACTIVE;
    if let Some(data) = command.data.as_ref() {
        bits |= PENDING_HAS_DATA;
        if data.direction == TransferDirection::ToCard {
            bits |= PENDING_WRITE;
        }
    }
    if command.response == ResponseKind::None {
        bits |= PENDING_NO_RESPONSE;
    }
    bits
}

/// One-shot completion event crossing the interrupt boundary.
///
/// The store to `signaled` is the release point for `status`; the engine's
/// acquire load of `signaled` makes the status word visible without any
/// critical section.
struct CompletionEvent {
    signaled: AtomicBool,
    status: AtomicU32,
}

impl CompletionEvent {
    fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            status: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.status.store(0, Ordering::Relaxed);
        self.signaled.store(false, Ordering::Release);
    }

    fn signal(&self, status: u32) {
        self.status.store(status, Ordering::Relaxed);
        self.signaled.store(true, Ordering::Release);
    }

    fn poll(&self) -> Option<u32> {
        if self.signaled.load(Ordering::Acquire) {
            Some(self.status.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// DMA-aligned staging memory for one bus.
#[repr(C, align(32))]
struct BounceBuffer {
    bytes: [u8; BOUNCE_CAPACITY],
}

struct Inner<D> {
    dma: D,
    bounce: BounceBuffer,
}

/// Request engine for one SDIO-class bus.
///
/// Generic over the controller register interface, the DMA channel, the
/// timebase and the card-stack callbacks, so one engine serves every
/// controller variant and the test suite's scripted mocks alike.
pub struct SdioEngine<C, D, T, S> {
    controller: C,
    timer: T,
    stack: S,
    config: EngineConfig,
    event: CompletionEvent,
    pending: AtomicU32,
    inner: Mutex<Inner<D>>,
}

impl<C, D, T, S> SdioEngine<C, D, T, S>
where
    C: HostController,
    D: DmaChannel,
    T: Timebase,
    S: CardStack,
{
    pub fn new(controller: C, dma: D, timer: T, stack: S, config: EngineConfig) -> Self {
        Self {
            controller,
            timer,
            stack,
            config,
            event: CompletionEvent::new(),
            pending: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                dma,
                bounce: BounceBuffer {
                    bytes: [0; BOUNCE_CAPACITY],
                },
            }),
        }
    }

    /// Runs `request` to completion.
    ///
    /// The main command is validated, staged and sent first; the stop
    /// command follows whether or not the main command succeeded. The
    /// stack's request-complete callback fires after the bus lock is
    /// released. Returns the first error recorded in the request's result
    /// slots.
    pub fn execute(&self, request: &mut Request<'_>) -> RequestResult {
        if request.main.is_none() && request.stop.is_none() {
            log::error!("sdio: request carries no commands");
            return Err(SdioError::InvalidArgument {});
        }
        {
            let mut inner = self.inner.lock();
            if let Some(main) = request.main.as_mut() {
                self.run_main(&mut inner, main);
            }
            if let Some(stop) = request.stop.as_mut() {
                self.send(&mut inner, stop, false);
            }
        }
        self.stack.request_complete();
        match request.first_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn run_main(&self, inner: &mut Inner<D>, main: &mut Command<'_>) {
        let validated = main
            .data
            .as_ref()
            .map(|data| (validate_data(data), data.direction));
        match validated {
            None => self.send(inner, main, false),
            Some((Err(error), _)) => {
                log::error!("sdio: cmd{} rejected, unusable data descriptor", main.opcode);
                main.error = Some(error);
            }
            Some((Ok(staged), direction)) => {
                if direction == TransferDirection::ToCard {
                    if let Some(data) = main.data.as_ref() {
                        inner.bounce.bytes[..staged].copy_from_slice(&data.buffer[..staged]);
                    }
                }
                self.send(inner, main, true);
                if direction == TransferDirection::FromCard {
                    if let Some(data) = main.data.as_mut() {
                        data.buffer[..staged].copy_from_slice(&inner.bounce.bytes[..staged]);
                    }
                }
            }
        }
    }

    /// Drives one command through the controller.
    ///
    /// `staged` is true when the dispatcher has placed this command's data
    /// in the bounce buffer; only the main command of a request ever is.
    fn send(&self, inner: &mut Inner<D>, command: &mut Command<'_>, staged: bool) {
        if command.data.is_some() && !staged {
            command.error = Some(SdioError::InvalidArgument {});
            return;
        }
        // a flag raised by the previous command must not satisfy this one
        self.event.reset();
        self.pending
            .store(pending_descriptor(command), Ordering::Release);
        log::debug!(
            "sdio: cmd{} arg={:#010x} resp={:?} data={}",
            command.opcode,
            command.argument,
            command.response,
            command.data.is_some()
        );

        let mut armed = false;
        if let Some(data) = command.data.as_mut() {
            // drop whatever data-path state the previous command left
            self.controller.configure_data(0, 0, 0);
            self.controller
                .configure_transfer(TransferMode::Block, TransferDirection::ToCard);
            self.controller.set_data_state_machine(false);
            self.controller.set_dma_handshake(false);

            if data.mode == TransferMode::Stream
                && data.direction == TransferDirection::ToCard
                && data.block_count == 1
                && (data.block_size as usize) < crc::STREAM_CRC_MAX_LEN
            {
                let len = data.block_size as usize;
                if let Some(trailer) = crc::crc16_stream_trailer(&inner.bounce.bytes[..len]) {
                    inner.bounce.bytes[len..len + crc::STREAM_CRC_TRAILER_LEN]
                        .copy_from_slice(&trailer);
                    data.block_size += crc::STREAM_CRC_TRAILER_LEN as u32;
                }
            }

            let length = data.block_count * data.block_size;
            let code = match data.mode {
                TransferMode::Block => registers::block_size_code(data.block_size).unwrap_or(0),
                TransferMode::Stream => 0,
            };
            self.controller
                .configure_data(registers::DATA_TIMEOUT_CYCLES, length, code);
            self.controller.configure_transfer(data.mode, data.direction);
            self.controller.set_sdio_operation(true);
            dma::arm(
                &self.controller,
                &mut inner.dma,
                data.direction,
                data.mode,
                &mut inner.bounce.bytes[..length as usize],
            );
            armed = true;
        }

        let mut sources = Status::CMDSEND | Status::CMDRECV | Status::ERRORS;
        if armed {
            sources |= Status::DTEND;
        }
        self.controller.clear_flags(sources);
        self.controller
            .set_interrupt_mask(self.controller.interrupt_mask() | sources);

        self.controller
            .program_command(command.opcode, command.argument, command.response.length());
        self.controller.start_command();

        self.wait_for_completion(command);
        // serialization point: the interrupt handler must not act on this
        // command again once the wait has returned
        self.pending.store(0, Ordering::Release);

        if armed {
            self.drain_data_path(command);
            dma::release(&mut inner.dma);
        }

        // leave only the card-interrupt enable armed between commands
        let mask = self.controller.interrupt_mask();
        self.controller.set_interrupt_mask(mask & Status::SDIOINT);
    }

    /// Blocks until the interrupt handler signals completion, then reads
    /// responses and classifies the signaled status word.
    fn wait_for_completion(&self, command: &mut Command<'_>) {
        let start = self.timer.now();
        let status = loop {
            if let Some(raw) = self.event.poll() {
                break Status::from_bits_retain(raw);
            }
            let elapsed = self
                .timer
                .now()
                .checked_duration_since(start)
                .unwrap_or(Duration::from_ticks(0));
            if elapsed >= self.config.command_timeout {
                log::error!("sdio: cmd{} completion wait timed out", command.opcode);
                command.error = Some(SdioError::CommandTimeout {});
                return;
            }
            hint::spin_loop();
        };

        command.response_words[0] = self.controller.response_word(0);
        if command.response == ResponseKind::Long {
            for index in 1..4 {
                command.response_words[index] = self.controller.response_word(index);
            }
        }

        if status.intersects(Status::ERRORS) {
            self.classify_errors(command, status);
        } else {
            command.error = None;
            log::debug!(
                "sdio: cmd{} done {:?} resp={:#010x}",
                command.opcode,
                status,
                command.response_words[0]
            );
        }
    }

    fn classify_errors(&self, command: &mut Command<'_>, status: Status) {
        if status.contains(Status::CCRCERR) && command.response.tolerates_crc_error() {
            // R3/R4-class responses carry no valid CRC field
            command.error = None;
        } else if status.contains(Status::CCRCERR) {
            command.error = Some(SdioError::CommandCrc {});
        } else {
            command.error = Some(SdioError::Busy {});
        }
        if status.contains(Status::CMDTMOUT) {
            command.error = Some(SdioError::CommandTimeout {});
        }
        if let Some(data) = command.data.as_mut() {
            if status.contains(Status::DTCRCERR) {
                data.error = Some(SdioError::DataCrc {});
            }
            if status.contains(Status::DTTMOUT) {
                data.error = Some(SdioError::DataTimeout {});
            }
        }
        if command.error.is_some() {
            // 5 and 8 are enumeration probes; failing them is routine
            if command.opcode == 5 || command.opcode == 8 {
                log::warn!(
                    "sdio: cmd{} arg={:#010x} failed {:?}",
                    command.opcode,
                    command.argument,
                    status
                );
            } else {
                log::error!(
                    "sdio: cmd{} arg={:#010x} failed {:?}",
                    command.opcode,
                    command.argument,
                    status
                );
            }
        } else {
            log::debug!(
                "sdio: cmd{} done {:?} resp={:#010x}",
                command.opcode,
                status,
                command.response_words[0]
            );
        }
    }

    /// Spins until the data path goes idle, bounded by the configured
    /// budget; a stuck or faulted path hard-resets the controller.
    fn drain_data_path(&self, command: &mut Command<'_>) {
        let mut spins = self.config.drain_spin_budget;
        while spins > 0 && self.controller.status().intersects(Status::TRANSFER_RUNNING) {
            spins -= 1;
            hint::spin_loop();
        }
        let status = self.controller.status();
        if spins == 0 || status.intersects(Status::ERRORS) {
            log::error!(
                "sdio: data path stuck after cmd{} ({:?}), resetting controller",
                command.opcode,
                status
            );
            self.controller.reset();
            command.error = Some(SdioError::Busy {});
        }
    }

    /// Applies a bus operating point: divider, lane width, power sequence.
    ///
    /// Refuses to program anything from a source clock under the 400 kHz
    /// floor. Unreachable target rates are clamped with a warning rather
    /// than failed. Idempotent for a fixed config.
    pub fn configure(&self, config: &BusConfig) {
        let source = self.controller.source_clock();
        if source.to_Hz() < bus::MIN_SOURCE_CLOCK_HZ {
            log::error!(
                "sdio: source clock {} Hz under the {} Hz floor, config refused",
                source.to_Hz(),
                bus::MIN_SOURCE_CLOCK_HZ
            );
            return;
        }
        let mut target = config.clock;
        if target > self.config.max_clock {
            target = self.config.max_clock;
        }
        if target > source {
            log::warn!(
                "sdio: requested {} Hz exceeds the {} Hz source, clamping",
                target.to_Hz(),
                source.to_Hz()
            );
            target = source;
        }
        log::debug!(
            "sdio: configure clock={} Hz width={:?} power={:?}",
            target.to_Hz(),
            config.width,
            config.power
        );

        let _inner = self.inner.lock();
        match bus::clock_divider(source, target) {
            Some(divider) => {
                let ratio = source.to_Hz() / target.to_Hz();
                if !(bus::DIVIDER_MIN_RATIO..=bus::DIVIDER_MAX_RATIO).contains(&ratio) {
                    log::warn!(
                        "sdio: {} Hz not reachable from {} Hz source, running degraded",
                        target.to_Hz(),
                        source.to_Hz()
                    );
                }
                self.controller.set_clock_divider(divider);
            }
            None => self.controller.set_hardware_clock(false),
        }
        self.controller.set_bus_width(config.width);
        match config.power {
            PowerMode::Off => {
                self.controller.set_power(PowerMode::Off);
                self.controller.set_bus_clock(false);
                self.controller.set_hardware_clock(false);
            }
            PowerMode::Up => {
                // pre-charge level only; clocks stay gated until On
                self.controller.set_power(PowerMode::Up);
            }
            PowerMode::On => {
                self.controller.set_hardware_clock(true);
                self.controller.set_bus_clock(true);
                self.controller.set_power(PowerMode::On);
            }
        }
    }

    /// Reports card presence. The reference slot has no detect line, so
    /// presence is assumed and enumeration decides.
    pub fn detect(&self) -> bool {
        log::info!("sdio: probing for card");
        true
    }

    /// Arms or disarms forwarding of the card's interrupt line to the
    /// stack's [`sdio_interrupt`](CardStack::sdio_interrupt) callback.
    pub fn enable_card_interrupt(&self, enabled: bool) {
        log::debug!(
            "sdio: card interrupt {}",
            if enabled { "enabled" } else { "disabled" }
        );
        if enabled {
            self.controller.clear_flags(Status::SDIOINT);
            self.controller
                .set_interrupt_mask(self.controller.interrupt_mask() | Status::SDIOINT);
        } else {
            self.controller
                .set_interrupt_mask(self.controller.interrupt_mask().difference(Status::SDIOINT));
        }
    }

    /// Classifies the raised status flags; call from the bus interrupt
    /// vector.
    ///
    /// Any error bit completes the pending command immediately. A received
    /// response completes commands without data and starts the data state
    /// machine for writes (transmission begins only once the card has
    /// answered). Command-sent completes response-less commands, data-end
    /// completes transfers, and the card-interrupt flag is forwarded to the
    /// stack when its enable is armed. Completion disables the error
    /// sources and signals the status word to the waiting engine thread.
    pub fn handle_interrupt(&self) {
        let status = self.controller.status();
        let pending = self.pending.load(Ordering::Acquire);
        let mut complete = false;
        if status.intersects(Status::ERRORS) {
            self.controller.clear_flags(Status::ERRORS);
            complete = true;
        } else {
            if status.contains(Status::CMDRECV) {
                self.controller.clear_flags(Status::CMDRECV);
                if pending & PENDING_ACTIVE != 0 {
                    if pending & PENDING_HAS_DATA == 0 {
                        complete = true;
                    } else if pending & PENDING_WRITE != 0 {
                        // the card answered; start pushing the payload
                        self.controller.set_data_state_machine(true);
                    }
                }
            }
            if status.contains(Status::CMDSEND) {
                self.controller.clear_flags(Status::CMDSEND);
                let wanted = PENDING_ACTIVE | PENDING_NO_RESPONSE;
                if pending & wanted == wanted {
                    complete = true;
                }
            }
            if status.contains(Status::DTEND) {
                self.controller.clear_flags(Status::DTEND);
                complete = true;
            }
        }
        if status.contains(Status::SDIOINT) && self.controller.interrupt_mask().contains(Status::SDIOINT)
        {
            self.controller.clear_flags(Status::SDIOINT);
            self.stack.sdio_interrupt();
        }
        if complete {
            let mask = self.controller.interrupt_mask();
            self.controller.set_interrupt_mask(mask.difference(Status::ERRORS));
            self.event.signal(status.bits());
        }
    }
}

impl<C, D, T, S> SdioHost for SdioEngine<C, D, T, S>
where
    C: HostController,
    D: DmaChannel,
    T: Timebase,
    S: CardStack,
{
    fn execute(&self, request: &mut Request<'_>) -> RequestResult {
        SdioEngine::execute(self, request)
    }

    fn configure(&self, config: &BusConfig) {
        SdioEngine::configure(self, config)
    }

    fn detect(&self) -> bool {
        SdioEngine::detect(self)
    }

    fn enable_card_interrupt(&self, enabled: bool) {
        SdioEngine::enable_card_interrupt(self, enabled)
    }
}

/// Checks a data descriptor against the bounce buffer and the hardware's
/// encodable field ranges. Returns the staged byte count.
fn validate_data(data: &DataDescriptor<'_>) -> Result<usize, SdioError> {
    let total = data.transfer_len();
    let capacity = match data.mode {
        TransferMode::Block => BOUNCE_CAPACITY,
        // stream writes may grow by the CRC trailer
        TransferMode::Stream => BOUNCE_CAPACITY - crc::STREAM_CRC_TRAILER_LEN,
    };
    if total == 0 || total > capacity as u64 {
        return Err(SdioError::InvalidArgument {});
    }
    match data.mode {
        TransferMode::Stream => {
            if data.block_count != 1 {
                return Err(SdioError::InvalidArgument {});
            }
        }
        TransferMode::Block => {
            if registers::block_size_code(data.block_size).is_none() {
                return Err(SdioError::InvalidArgument {});
            }
        }
    }
    let total = total as usize;
    if data.buffer.len() < total {
        return Err(SdioError::InvalidArgument {});
    }
    Ok(total)
}
