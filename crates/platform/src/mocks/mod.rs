//! Mock implementations for testing
//!
//! Recording doubles for the pipeline contracts, for use in unit and
//! integration tests of drivers and pushers.

#![cfg(any(test, feature = "std"))]

extern crate std;

use std::sync::Mutex;
use std::vec::Vec;

use crate::display::{CommandBus, DisplayError, WriteCallback};
use crate::dma::{PixelDma, StreamMode};
use crate::framebuffer::Framebuffer;

/// One completion seen by [`RecordingCallback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Address of the returned framebuffer
    pub address: usize,
    /// Whether the returned handle was still valid
    pub valid: bool,
    /// Reported transport status
    pub status: Result<(), DisplayError>,
}

/// Completion hook that records every invocation
#[derive(Debug, Default)]
pub struct RecordingCallback {
    calls: Mutex<Vec<Completion>>,
}

impl RecordingCallback {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every completion so far, oldest first
    pub fn calls(&self) -> Vec<Completion> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of completions so far
    pub fn count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl<'a> WriteCallback<'a> for RecordingCallback {
    fn complete(&self, framebuffer: Framebuffer<'a>, status: Result<(), DisplayError>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Completion {
                address: framebuffer.as_ptr() as usize,
                valid: framebuffer.is_valid(),
                status,
            });
        }
    }
}

/// Traffic seen by [`RecordingBus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Opcode and its data bytes
    Command(u8, Vec<u8>),
    /// One pixel stream
    Pixels(Vec<u16>),
}

/// Command bus that records traffic instead of driving hardware
#[derive(Debug, Default)]
pub struct RecordingBus {
    /// Everything sent so far
    pub events: Vec<BusEvent>,
    /// Fail any command with this opcode
    pub fail_opcode: Option<u8>,
    /// Fail every pixel stream
    pub fail_pixels: bool,
}

impl RecordingBus {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Opcodes in the order they were sent
    pub fn opcodes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Command(op, _) => Some(*op),
                BusEvent::Pixels(_) => None,
            })
            .collect()
    }

    /// All streamed pixels, concatenated
    pub fn pixels(&self) -> Vec<u16> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Pixels(p) => Some(p.iter().copied()),
                BusEvent::Command(..) => None,
            })
            .flatten()
            .collect()
    }
}

impl CommandBus for RecordingBus {
    async fn command(&mut self, opcode: u8, data: &[u8]) -> Result<(), DisplayError> {
        if self.fail_opcode == Some(opcode) {
            return Err(DisplayError::Communication);
        }
        self.events.push(BusEvent::Command(opcode, data.to_vec()));
        Ok(())
    }

    async fn write_pixels<I>(&mut self, pixels: I) -> Result<(), DisplayError>
    where
        I: IntoIterator<Item = u16>,
    {
        if self.fail_pixels {
            return Err(DisplayError::Communication);
        }
        self.events.push(BusEvent::Pixels(pixels.into_iter().collect()));
        Ok(())
    }
}

/// One transfer seen by [`MockDma`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    /// Source address
    pub source: usize,
    /// Pixels requested
    pub pixels: usize,
    /// Mode the channel was configured for
    pub mode: StreamMode,
}

/// DMA channel that records transfers and completes them on demand
#[derive(Debug, Default)]
pub struct MockDma {
    /// Transfers started so far
    pub transfers: Vec<DmaTransfer>,
    /// Modes passed to `configure`
    pub configured: Vec<StreamMode>,
    /// Channel limit reported to the pusher
    pub max_transfer: Option<usize>,
    /// Fail the next `start`
    pub fail_next_start: bool,
    mode: StreamMode,
    running: bool,
    irq_pending: bool,
}

impl MockDma {
    /// Create an idle channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the running transfer and raise the completion interrupt.
    pub fn finish(&mut self) {
        if self.running {
            self.running = false;
            self.irq_pending = true;
        }
    }
}

impl PixelDma for MockDma {
    type Error = DisplayError;

    fn configure(&mut self, mode: StreamMode) -> Result<(), Self::Error> {
        self.mode = mode;
        self.configured.push(mode);
        Ok(())
    }

    fn max_transfer_pixels(&self) -> usize {
        self.max_transfer.unwrap_or(usize::MAX)
    }

    unsafe fn start(&mut self, source: *const u16, pixels: usize) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next_start) {
            return Err(DisplayError::Communication);
        }
        self.transfers.push(DmaTransfer {
            source: source as usize,
            pixels,
            mode: self.mode,
        });
        self.running = true;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.running
    }

    fn acknowledge_irq(&mut self) -> bool {
        core::mem::take(&mut self.irq_pending)
    }
}
