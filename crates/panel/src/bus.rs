//! SPI command bus
//!
//! [`DcsBus`] drives a DCS controller over a 4-wire serial interface: an
//! async [`SpiDevice`] (which owns chip-select) plus a Data/Command pin.
//!
//! # Wiring
//!
//! | Signal | Direction | Notes |
//! |--------|-----------|-------|
//! | SCK    | Host → Panel | SPI mode 3, MSB first |
//! | MOSI   | Host → Panel | |
//! | CS     | Host → Panel | Managed by `SpiDevice` |
//! | D/C    | Host → Panel | LOW = command, HIGH = data |
//!
//! Every SPI write is bounded by a timeout; a write that does not finish in
//! time fails with [`DisplayError::DeadlineExceeded`].

use embassy_time::{with_timeout, Duration};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiDevice;

use platform::{CommandBus, DisplayError};

/// Default bound on a single SPI write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Bytes per SPI write when streaming pixels (128 pixels).
pub const PIXEL_CHUNK_BYTES: usize = 256;

/// D/C-pin command bus over an async SPI device.
pub struct DcsBus<SPI, DC> {
    spi: SPI,
    dc: DC,
    timeout: Duration,
}

impl<SPI, DC> DcsBus<SPI, DC>
where
    SPI: SpiDevice,
    DC: OutputPin,
{
    /// Bus with the default per-write timeout.
    pub fn new(spi: SPI, dc: DC) -> Self {
        Self {
            spi,
            dc,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the per-write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-write timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Give back the SPI device and D/C pin.
    pub fn release(self) -> (SPI, DC) {
        (self.spi, self.dc)
    }

    /// One bounded `SpiDevice::write`.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        with_timeout(self.timeout, self.spi.write(bytes))
            .await
            .map_err(|_| DisplayError::DeadlineExceeded)?
            .map_err(|_| DisplayError::Communication)
    }
}

impl<SPI, DC> CommandBus for DcsBus<SPI, DC>
where
    SPI: SpiDevice,
    DC: OutputPin,
{
    /// DC low, opcode, DC high, then data bytes (if any).
    async fn command(&mut self, opcode: u8, data: &[u8]) -> Result<(), DisplayError> {
        self.dc.set_low().map_err(|_| DisplayError::Gpio)?;
        self.write(&[opcode]).await?;
        self.dc.set_high().map_err(|_| DisplayError::Gpio)?;
        if data.is_empty() {
            return Ok(());
        }
        self.write(data).await
    }

    /// Sends in fixed 256-byte chunks; D/C is already high after the
    /// preceding command.
    async fn write_pixels<I>(&mut self, pixels: I) -> Result<(), DisplayError>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut pixels = pixels.into_iter().peekable();
        while pixels.peek().is_some() {
            let mut buf = [0u8; PIXEL_CHUNK_BYTES];
            let mut used = 0usize;
            for (slot, pixel) in buf.chunks_exact_mut(2).zip(pixels.by_ref()) {
                slot.copy_from_slice(&pixel.to_be_bytes());
                used = used.saturating_add(2);
            }
            self.write(buf.get(..used).unwrap_or_default()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    /// TransactionStart + Write(data) + TransactionEnd for one `spi.write`.
    fn spi_device_write(data: &[u8]) -> [SpiTransaction<u8>; 3] {
        [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(data.to_vec()),
            SpiTransaction::transaction_end(),
        ]
    }

    fn expectations(writes: &[&[u8]]) -> Vec<SpiTransaction<u8>> {
        writes.iter().flat_map(|w| spi_device_write(w)).collect()
    }

    #[tokio::test]
    async fn test_command_frame_toggles_dc() {
        let mut spi = SpiMock::new(&expectations(&[&[0x3A], &[0x55]]));
        let mut dc = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);

        let mut bus = DcsBus::new(spi.clone(), dc.clone());
        bus.command(0x3A, &[0x55]).await.unwrap();

        spi.done();
        dc.done();
    }

    #[tokio::test]
    async fn test_command_without_data_leaves_dc_high() {
        let mut spi = SpiMock::new(&expectations(&[&[0x2C]]));
        let mut dc = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);

        let mut bus = DcsBus::new(spi.clone(), dc.clone());
        bus.command(0x2C, &[]).await.unwrap();

        spi.done();
        dc.done();
    }

    #[tokio::test]
    async fn test_pixels_are_sent_msb_first() {
        let mut spi = SpiMock::new(&expectations(&[&[0xF8, 0x00, 0x07, 0xE0, 0x00, 0x1F]]));
        let mut dc = PinMock::new(&[]);

        let mut bus = DcsBus::new(spi.clone(), dc.clone());
        bus.write_pixels([0xF800, 0x07E0, 0x001F]).await.unwrap();

        spi.done();
        dc.done();
    }

    #[tokio::test]
    async fn test_pixel_stream_is_chunked() {
        // 130 pixels = 260 bytes → one full 256-byte chunk + 4 bytes.
        let pixels: Vec<u16> = (0..130).collect();
        let bytes: Vec<u8> = pixels.iter().flat_map(|p| p.to_be_bytes()).collect();
        let mut spi = SpiMock::new(&expectations(&[&bytes[..256], &bytes[256..]]));
        let mut dc = PinMock::new(&[]);

        let mut bus = DcsBus::new(spi.clone(), dc.clone());
        bus.write_pixels(pixels).await.unwrap();

        spi.done();
        dc.done();
    }

    #[tokio::test]
    async fn test_empty_pixel_stream_sends_nothing() {
        let mut spi = SpiMock::new(&[]);
        let mut dc = PinMock::new(&[]);

        let mut bus = DcsBus::new(spi.clone(), dc.clone());
        bus.write_pixels(core::iter::empty()).await.unwrap();

        spi.done();
        dc.done();
    }

    #[test]
    fn test_default_timeout() {
        let bus = DcsBus::new(SpiMock::<u8>::new(&[]), PinMock::new(&[]));
        assert_eq!(bus.timeout(), Duration::from_millis(10));
        let bus = bus.with_timeout(Duration::from_millis(50));
        assert_eq!(bus.timeout(), Duration::from_millis(50));
        let (mut spi, mut dc) = bus.release();
        spi.done();
        dc.done();
    }
}
