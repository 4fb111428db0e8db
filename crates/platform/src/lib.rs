//! Display pipeline contracts for small color panels
//!
//! This crate holds the hardware-independent half of the display output
//! pipeline: the framebuffer handle, the pool that vends framebuffers, and
//! the traits that controller drivers and pixel transports implement.
//!
//! # Architecture Layers
//!
//! ```text
//! Application (renders into Framebuffers)
//!         ↓
//! Display facade (panel crate)
//!         ↓
//! DisplayDriver  ──►  PixelPusher  ──►  PixelDma / CommandBus
//!         ↓
//! Hardware Layer (SPI, GPIO, DMA, DSI host)
//! ```
//!
//! # Abstraction Levels
//!
//! ## Buffers
//! - [`Framebuffer`] - Move-only handle to one RGB565 buffer
//! - [`FramebufferPool`] - Fixed set of buffers under a counting semaphore
//!
//! ## Contracts
//! - [`DisplayDriver`] - Controller init, frame writes, row writes
//! - [`PixelPusher`] - Whole-frame streaming with completion callback
//! - [`CommandBus`] - DCS command channel
//! - [`PixelDma`] - DMA channel feeding the transport
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `defmt`: Enable defmt logging and `defmt::Format` derives
//!
//! # Example
//!
//! ```no_run
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use platform::FramebufferPool;
//!
//! async fn render(pool: &FramebufferPool<'_, CriticalSectionRawMutex, 2>) {
//!     let mut fb = pool.get_framebuffer().await;
//!     fb.fill(0xF800);
//!     pool.release_framebuffer(fb);
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
// Pedantic lints suppressed for this HAL crate:
#![allow(clippy::doc_markdown)] // opcode and register names in doc comments
#![allow(clippy::must_use_candidate)] // callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod display;
pub mod dma;
pub mod framebuffer;
pub mod mocks;
pub mod peripheral;
pub mod pool;
pub mod touch;

// Re-export main high-level traits
pub use display::{
    CommandBus, DisplayDriver, DisplayError, PixelPusher, WriteCallback, WriteRejected,
};
pub use framebuffer::{Framebuffer, PixelFormat};
pub use pool::FramebufferPool;
pub use touch::{NoTouchscreen, TouchPoint, Touchscreen};

// Re-export DMA types
pub use dma::{PixelDma, ScanCursor, Segment, StreamMode};

// Re-export peripheral types
pub use peripheral::{BitOrder, ClockPhase, ClockPolarity, SpiConfig, SpiMode};
