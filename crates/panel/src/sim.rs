//! Host panel simulator
//!
//! A software DCS controller for desktop runs and end-to-end tests. The SPI
//! device, D/C pin, reset pin, delay and DMA channel handed out by
//! [`SimulatedPanel`] all feed one shared model, which decodes the traffic
//! the way a real controller would:
//!
//! - CASET / RASET set the column and row window.
//! - RAMWR resets the write cursor to the window origin; the data bytes that
//!   follow are big-endian RGB565 pixels written into GRAM, wrapping inside
//!   the window.
//! - Every other command is logged with its parameter bytes.
//!
//! Pixels pushed through [`SimDma`] land in GRAM the same way, doubled in
//! [`StreamMode::PixelDouble`].

use std::sync::{Arc, Mutex};

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{Operation, SpiDevice};

use platform::{PixelDma, StreamMode};

use crate::dcs::Command;

/// Failure reported by a simulated peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// The shared model was poisoned by a panicking thread.
    Poisoned,
    /// Fault injected with [`SimulatedPanel::set_fail_writes`].
    Injected,
}

impl spi::Error for SimError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

impl digital::Error for SimError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// A command as the controller received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    /// Opcode byte
    pub opcode: u8,
    /// Parameter bytes; empty for RAMWR, whose data goes to GRAM
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct PanelModel {
    width: u16,
    height: u16,
    gram: Vec<u16>,
    columns: (u16, u16),
    rows: (u16, u16),
    cursor: (u16, u16),
    data_mode: bool,
    current: Option<u8>,
    high_byte: Option<u8>,
    log: Vec<LoggedCommand>,
    pixels_written: usize,
    sleeping: bool,
    display_on: bool,
    in_reset: bool,
    resets: usize,
    elapsed_ns: u64,
    fail_writes: bool,
}

impl PanelModel {
    fn new(width: u16, height: u16) -> Self {
        let len = usize::from(width).saturating_mul(usize::from(height));
        Self {
            width,
            height,
            gram: vec![0; len],
            columns: (0, width.saturating_sub(1)),
            rows: (0, height.saturating_sub(1)),
            cursor: (0, 0),
            data_mode: false,
            current: None,
            high_byte: None,
            log: Vec::new(),
            pixels_written: 0,
            sleeping: true,
            display_on: false,
            in_reset: false,
            resets: 0,
            elapsed_ns: 0,
            fail_writes: false,
        }
    }

    /// Power-on register state; GRAM content is undefined and kept.
    fn reset_registers(&mut self) {
        self.columns = (0, self.width.saturating_sub(1));
        self.rows = (0, self.height.saturating_sub(1));
        self.cursor = (0, 0);
        self.current = None;
        self.high_byte = None;
        self.sleeping = true;
        self.display_on = false;
    }

    fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.data_mode {
                self.data(byte);
            } else {
                self.opcode(byte);
            }
        }
    }

    fn opcode(&mut self, opcode: u8) {
        tracing::trace!(opcode, "sim: command");
        self.current = Some(opcode);
        self.high_byte = None;
        self.log.push(LoggedCommand { opcode, data: Vec::new() });
        match opcode {
            op if op == Command::SoftReset.opcode() => self.reset_registers(),
            op if op == Command::SleepOut.opcode() => self.sleeping = false,
            op if op == Command::SleepIn.opcode() => self.sleeping = true,
            op if op == Command::DisplayOn.opcode() => self.display_on = true,
            op if op == Command::DisplayOff.opcode() => self.display_on = false,
            op if op == Command::MemoryWrite.opcode() => {
                self.cursor = (self.columns.0, self.rows.0);
            }
            _ => {}
        }
    }

    fn data(&mut self, byte: u8) {
        let Some(opcode) = self.current else {
            tracing::warn!(byte, "sim: data byte with no command");
            return;
        };
        if opcode == Command::MemoryWrite.opcode() {
            match self.high_byte.take() {
                Some(hi) => self.pixel(u16::from_be_bytes([hi, byte])),
                None => self.high_byte = Some(byte),
            }
            return;
        }
        let Some(entry) = self.log.last_mut() else {
            return;
        };
        entry.data.push(byte);
        if let [a, b, c, d] = *entry.data.as_slice() {
            let range = (u16::from_be_bytes([a, b]), u16::from_be_bytes([c, d]));
            if opcode == Command::ColumnAddressSet.opcode() {
                tracing::debug!(x0 = range.0, x1 = range.1, "sim: column window");
                self.columns = range;
            } else if opcode == Command::RowAddressSet.opcode() {
                tracing::debug!(y0 = range.0, y1 = range.1, "sim: row window");
                self.rows = range;
            }
        }
    }

    /// Store at the cursor, then advance inside the window.
    fn pixel(&mut self, color: u16) {
        let (x, y) = self.cursor;
        if x < self.width && y < self.height {
            let index = usize::from(y)
                .saturating_mul(usize::from(self.width))
                .saturating_add(usize::from(x));
            if let Some(slot) = self.gram.get_mut(index) {
                *slot = color;
            }
        }
        self.pixels_written = self.pixels_written.saturating_add(1);

        let (mut x, mut y) = (x.saturating_add(1), y);
        if x > self.columns.1 {
            x = self.columns.0;
            y = y.saturating_add(1);
            if y > self.rows.1 {
                y = self.rows.0;
            }
        }
        self.cursor = (x, y);
    }
}

/// Shared handle to a simulated DCS controller.
#[derive(Debug, Clone)]
pub struct SimulatedPanel {
    model: Arc<Mutex<PanelModel>>,
}

impl SimulatedPanel {
    /// A panel with `width` × `height` pixels of GRAM, asleep and off.
    pub fn new(width: u16, height: u16) -> Self {
        tracing::debug!(width, height, "sim: panel created");
        Self {
            model: Arc::new(Mutex::new(PanelModel::new(width, height))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PanelModel) -> R) -> Result<R, SimError> {
        let mut model = self.model.lock().map_err(|_| SimError::Poisoned)?;
        Ok(f(&mut model))
    }

    /// SPI device wired to this panel.
    pub fn spi(&self) -> SimSpi {
        SimSpi { panel: self.clone() }
    }

    /// D/C pin wired to this panel.
    pub fn dc_pin(&self) -> SimDcPin {
        SimDcPin { panel: self.clone() }
    }

    /// Reset pin wired to this panel.
    pub fn reset_pin(&self) -> SimResetPin {
        SimResetPin { panel: self.clone() }
    }

    /// Delay that advances this panel's clock instead of sleeping.
    pub fn delay(&self) -> SimDelay {
        SimDelay { panel: self.clone() }
    }

    /// DMA channel streaming into this panel's GRAM.
    pub fn dma(&self) -> SimDma {
        SimDma {
            panel: self.clone(),
            mode: StreamMode::Direct,
            max_transfer: usize::MAX,
            irq_pending: false,
            transfers: 0,
        }
    }

    /// Make every subsequent SPI write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        let _ = self.with(|m| m.fail_writes = fail);
    }

    /// GRAM content at (`x`, `y`).
    pub fn pixel(&self, x: u16, y: u16) -> Option<u16> {
        self.with(|m| {
            if x >= m.width || y >= m.height {
                return None;
            }
            let index = usize::from(y)
                .checked_mul(usize::from(m.width))?
                .checked_add(usize::from(x))?;
            m.gram.get(index).copied()
        })
        .ok()
        .flatten()
    }

    /// One GRAM row; empty when out of range.
    pub fn row(&self, y: u16) -> Vec<u16> {
        self.with(|m| {
            let width = usize::from(m.width);
            let start = usize::from(y).saturating_mul(width);
            m.gram
                .get(start..start.saturating_add(width))
                .map(<[u16]>::to_vec)
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Every command received, oldest first.
    pub fn commands(&self) -> Vec<LoggedCommand> {
        self.with(|m| m.log.clone()).unwrap_or_default()
    }

    /// Opcodes received, oldest first.
    pub fn opcodes(&self) -> Vec<u8> {
        self.commands().iter().map(|c| c.opcode).collect()
    }

    /// Forget the command log.
    pub fn clear_log(&self) {
        let _ = self.with(|m| m.log.clear());
    }

    /// Pixels written to GRAM since creation.
    pub fn pixels_written(&self) -> usize {
        self.with(|m| m.pixels_written).unwrap_or(0)
    }

    /// Awake and displaying.
    pub fn is_on(&self) -> bool {
        self.with(|m| !m.sleeping && m.display_on).unwrap_or(false)
    }

    /// Hardware resets seen on the reset pin.
    pub fn resets(&self) -> usize {
        self.with(|m| m.resets).unwrap_or(0)
    }

    /// Time spent in [`SimDelay`], in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.with(|m| m.elapsed_ns / 1_000_000).unwrap_or(0)
    }
}

/// SPI side of the simulated panel.
#[derive(Debug, Clone)]
pub struct SimSpi {
    panel: SimulatedPanel,
}

impl spi::ErrorType for SimSpi {
    type Error = SimError;
}

impl SpiDevice<u8> for SimSpi {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        self.panel.with(|m| {
            if m.fail_writes {
                return Err(SimError::Injected);
            }
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(buf) => m.feed(buf),
                    Operation::Transfer(read, write) => {
                        m.feed(write);
                        read.fill(0);
                    }
                    Operation::TransferInPlace(buf) => {
                        m.feed(buf);
                        buf.fill(0);
                    }
                    Operation::Read(buf) => buf.fill(0),
                    Operation::DelayNs(_) => {}
                }
            }
            Ok(())
        })?
    }
}

/// D/C pin of the simulated panel: low selects command, high data.
#[derive(Debug, Clone)]
pub struct SimDcPin {
    panel: SimulatedPanel,
}

impl digital::ErrorType for SimDcPin {
    type Error = SimError;
}

impl OutputPin for SimDcPin {
    fn set_low(&mut self) -> Result<(), SimError> {
        self.panel.with(|m| m.data_mode = false)
    }

    fn set_high(&mut self) -> Result<(), SimError> {
        self.panel.with(|m| m.data_mode = true)
    }
}

/// Active-low reset pin of the simulated panel.
#[derive(Debug, Clone)]
pub struct SimResetPin {
    panel: SimulatedPanel,
}

impl digital::ErrorType for SimResetPin {
    type Error = SimError;
}

impl OutputPin for SimResetPin {
    fn set_low(&mut self) -> Result<(), SimError> {
        self.panel.with(|m| {
            m.in_reset = true;
            m.reset_registers();
        })
    }

    fn set_high(&mut self) -> Result<(), SimError> {
        self.panel.with(|m| {
            if m.in_reset {
                m.in_reset = false;
                m.resets = m.resets.saturating_add(1);
                tracing::debug!(resets = m.resets, "sim: hardware reset");
            }
        })
    }
}

/// Delay that only advances the simulated clock.
#[derive(Debug, Clone)]
pub struct SimDelay {
    panel: SimulatedPanel,
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        let _ = self
            .panel
            .with(|m| m.elapsed_ns = m.elapsed_ns.saturating_add(u64::from(ns)));
    }
}

/// DMA channel of the simulated panel.
///
/// Transfers complete as soon as they start; the completion interrupt stays
/// pending until acknowledged.
#[derive(Debug)]
pub struct SimDma {
    panel: SimulatedPanel,
    mode: StreamMode,
    max_transfer: usize,
    irq_pending: bool,
    transfers: usize,
}

impl SimDma {
    /// Limit transfers to `pixels` each.
    #[must_use]
    pub fn with_max_transfer(mut self, pixels: usize) -> Self {
        self.max_transfer = pixels.max(1);
        self
    }

    /// Transfers started so far.
    pub fn transfers(&self) -> usize {
        self.transfers
    }

    /// Whether a completion interrupt is waiting to be acknowledged.
    pub fn irq_pending(&self) -> bool {
        self.irq_pending
    }
}

impl PixelDma for SimDma {
    type Error = SimError;

    fn configure(&mut self, mode: StreamMode) -> Result<(), SimError> {
        tracing::debug!(?mode, "sim: dma configured");
        self.mode = mode;
        Ok(())
    }

    fn max_transfer_pixels(&self) -> usize {
        self.max_transfer
    }

    unsafe fn start(&mut self, source: *const u16, pixels: usize) -> Result<(), SimError> {
        // SAFETY: the caller keeps `source..source + pixels` valid until the
        // interrupt is acknowledged, and the copy below finishes before this
        // function returns.
        let data = unsafe { core::slice::from_raw_parts(source, pixels) };
        let mode = self.mode;
        self.panel.with(|m| {
            if m.fail_writes {
                return Err(SimError::Injected);
            }
            for &color in data {
                m.pixel(color);
                if mode == StreamMode::PixelDouble {
                    m.pixel(color);
                }
            }
            Ok(())
        })??;
        self.transfers = self.transfers.saturating_add(1);
        self.irq_pending = true;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn acknowledge_irq(&mut self) -> bool {
        core::mem::take(&mut self.irq_pending)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    use platform::CommandBus;

    use crate::bus::DcsBus;

    #[tokio::test]
    async fn test_window_and_memory_write_fill_gram() {
        let panel = SimulatedPanel::new(4, 4);
        let mut bus = DcsBus::new(panel.spi(), panel.dc_pin());

        bus.command(0x2A, &[0, 1, 0, 2]).await.unwrap();
        bus.command(0x2B, &[0, 3, 0, 3]).await.unwrap();
        bus.command(0x2C, &[]).await.unwrap();
        bus.write_pixels([0x1234, 0x5678]).await.unwrap();

        assert_eq!(panel.row(3), vec![0, 0x1234, 0x5678, 0]);
        assert_eq!(panel.opcodes(), vec![0x2A, 0x2B, 0x2C]);
        assert_eq!(panel.commands()[0].data, vec![0, 1, 0, 2]);
    }

    #[tokio::test]
    async fn test_memory_write_wraps_inside_window() {
        let panel = SimulatedPanel::new(4, 4);
        let mut bus = DcsBus::new(panel.spi(), panel.dc_pin());

        bus.command(0x2A, &[0, 0, 0, 1]).await.unwrap();
        bus.command(0x2B, &[0, 0, 0, 1]).await.unwrap();
        bus.command(0x2C, &[]).await.unwrap();
        bus.write_pixels([1, 2, 3, 4, 5]).await.unwrap();

        // Fifth pixel wraps back to the window origin.
        assert_eq!(panel.row(0), vec![5, 2, 0, 0]);
        assert_eq!(panel.row(1), vec![3, 4, 0, 0]);
    }

    #[tokio::test]
    async fn test_injected_fault_surfaces_as_communication_error() {
        let panel = SimulatedPanel::new(2, 2);
        let mut bus = DcsBus::new(panel.spi(), panel.dc_pin());
        panel.set_fail_writes(true);
        assert_eq!(
            bus.command(0x29, &[]).await,
            Err(platform::DisplayError::Communication)
        );
    }

    #[test]
    fn test_dma_doubles_pixels_and_raises_irq() {
        let panel = SimulatedPanel::new(4, 1);
        let mut dc = panel.dc_pin();
        dc.set_low().unwrap();
        panel.with(|m| m.feed(&[0x2C])).unwrap();

        let mut dma = panel.dma();
        dma.configure(StreamMode::PixelDouble).unwrap();
        let src = [7u16, 9];
        // SAFETY: the simulated channel copies synchronously; `src` outlives the call.
        unsafe { dma.start(src.as_ptr(), src.len()) }.unwrap();

        assert_eq!(panel.row(0), vec![7, 7, 9, 9]);
        assert!(dma.acknowledge_irq());
        assert!(!dma.acknowledge_irq());
        assert_eq!(dma.transfers(), 1);
    }

    #[test]
    fn test_reset_pin_restores_power_on_state() {
        let panel = SimulatedPanel::new(2, 2);
        panel.with(|m| m.feed(&[0x11, 0x29])).unwrap();
        assert!(panel.is_on());

        let mut rst = panel.reset_pin();
        rst.set_low().unwrap();
        rst.set_high().unwrap();
        assert!(!panel.is_on());
        assert_eq!(panel.resets(), 1);
    }
}
