//! Pixel pushers
//!
//! Two transports stream whole framebuffers to a DCS controller:
//!
//! - [`SpiPixelPusher`] - CPU-driven, through the command bus; completes
//!   before `write_framebuffer` returns.
//! - [`DmaPixelPusher`] - a DMA channel feeding the transport, re-armed from
//!   the channel's completion interrupt; optionally waits for the panel's
//!   tearing-effect signal before the first transfer.
//!
//! Both send the memory-write opcode before the first pixel of a frame
//! whenever the controller may have left write mode.

pub mod dma;
pub mod spi;

pub use dma::DmaPixelPusher;
pub use spi::SpiPixelPusher;
