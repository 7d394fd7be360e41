//! A hardware-agnostic request engine for SDIO-class card buses
//!
//! The engine in [`engine`] owns everything stateful about one bus: the
//! bounce buffer transfers stage through, the DMA channel, the completion
//! event shared with the interrupt handler and the command serialization
//! lock. Hardware access goes through the traits in [`backend`], so the
//! same engine drives real controller registers on a target and scripted
//! mocks under `cargo test`.
//!
//! Card enumeration, block-device semantics and filesystem layers live
//! above this crate; it speaks raw commands, responses and data phases
//! only.

#![no_std]

pub mod backend;
pub mod bus;
pub mod command;
pub mod crc;
pub mod dma;
pub mod engine;
pub mod errors;
pub mod registers;
