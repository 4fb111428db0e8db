//! DCS display driver
//!
//! Drives ILI9341 / ST7789 / ST7735-class controllers: runs the init
//! script, then routes each framebuffer to the pixel pusher.
//!
//! # Write dispatch
//!
//! | Framebuffer size | Path |
//! |------------------|------|
//! | = panel          | pusher, [`StreamMode::Direct`] |
//! | = panel / 2 and pusher can double | pusher, [`StreamMode::PixelDouble`] |
//! | panel / n (integer n) | per-row writes through a scratch line |
//!
//! # Wiring
//!
//! | Signal | Direction | Notes |
//! |--------|-----------|-------|
//! | SPI + D/C | Host → Panel | Owned by the [`CommandBus`] |
//! | RST    | Host → Panel | Optional; LOW resets the controller |
//! | TE     | Panel → Host | Optional; feeds [`DmaPixelPusher::on_tear_effect`](crate::DmaPixelPusher::on_tear_effect) |

use core::convert::Infallible;

use embedded_graphics::geometry::Size;
use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;

use platform::{
    CommandBus, DisplayDriver, DisplayError, Framebuffer, NoTouchscreen, PixelPusher,
    StreamMode, TouchPoint, Touchscreen, WriteCallback, WriteRejected,
};

use crate::config::PanelConfig;
use crate::dcs::{self, Command};
use crate::resize::ResizePlan;
use crate::script::{self, Step};

/// Default scratch line for the resize path, in pixels.
pub const DEFAULT_SCRATCH: usize = 80;

/// Reset "pin" for panels whose reset line is not wired to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResetPin;

impl ErrorType for NoResetPin {
    type Error = Infallible;
}

impl OutputPin for NoResetPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// DCS panel driver.
///
/// Generic over:
/// - `B`: the [`CommandBus`] (usually [`DcsBus`](crate::DcsBus)).
/// - `RST`: Reset [`OutputPin`]; pass `None` when not wired.
/// - `DELAY`: [`DelayNs`] for script delays.
/// - `P`: the [`PixelPusher`] that streams whole frames.
/// - `T`: an attached [`Touchscreen`].
/// - `S`: scratch line length for the resize path.
///
/// On target supply `embassy_time::Delay` for `DELAY`. In host tests supply
/// `embedded_hal_mock::eh1::delay::NoopDelay`.
pub struct DcsDisplayDriver<B, RST, DELAY, P, T = NoTouchscreen, const S: usize = DEFAULT_SCRATCH>
{
    bus: B,
    reset: Option<RST>,
    delay: DELAY,
    pusher: P,
    touch: T,
    config: PanelConfig,
    initialized: bool,
    /// A row write moved the controller's address window off the full panel.
    window_dirty: bool,
    scratch: [u16; S],
}

impl<B, RST, DELAY, P> DcsDisplayDriver<B, RST, DELAY, P>
where
    B: CommandBus,
    RST: OutputPin,
    DELAY: DelayNs,
{
    /// Create a driver; call [`DisplayDriver::init`] before anything else.
    pub fn new(bus: B, reset: Option<RST>, delay: DELAY, pusher: P, config: PanelConfig) -> Self {
        Self {
            bus,
            reset,
            delay,
            pusher,
            touch: NoTouchscreen,
            config,
            initialized: false,
            window_dirty: true,
            scratch: [0; DEFAULT_SCRATCH],
        }
    }
}

impl<B, RST, DELAY, P, T, const S: usize> DcsDisplayDriver<B, RST, DELAY, P, T, S>
where
    B: CommandBus,
    RST: OutputPin,
    DELAY: DelayNs,
{
    /// Attach a touch controller.
    pub fn with_touchscreen<T2: Touchscreen>(self, touch: T2) -> DcsDisplayDriver<B, RST, DELAY, P, T2, S> {
        DcsDisplayDriver {
            bus: self.bus,
            reset: self.reset,
            delay: self.delay,
            pusher: self.pusher,
            touch,
            config: self.config,
            initialized: self.initialized,
            window_dirty: self.window_dirty,
            scratch: self.scratch,
        }
    }

    /// Use a scratch line of `S2` pixels for the resize path.
    pub fn with_scratch<const S2: usize>(self) -> DcsDisplayDriver<B, RST, DELAY, P, T, S2> {
        DcsDisplayDriver {
            bus: self.bus,
            reset: self.reset,
            delay: self.delay,
            pusher: self.pusher,
            touch: self.touch,
            config: self.config,
            initialized: self.initialized,
            window_dirty: self.window_dirty,
            scratch: [0; S2],
        }
    }

    /// Panel configuration
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Whether `init` has succeeded since construction or the last reset.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The command bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// The pixel pusher
    pub fn pusher(&self) -> &P {
        &self.pusher
    }

    /// Pulse the reset line.
    ///
    /// Fails with `Unavailable` when no reset pin was supplied. The
    /// controller forgets its configuration, so `init` must run again.
    pub async fn reset(&mut self) -> Result<(), DisplayError> {
        let Some(rst) = self.reset.as_mut() else {
            return Err(DisplayError::Unavailable);
        };
        self.initialized = false;
        script::pulse_reset(rst, &mut self.delay).await
    }
}

/// CASET / RASET / RAMWR for one run, then the pixels.
async fn write_window_row<B: CommandBus>(
    bus: &mut B,
    config: &PanelConfig,
    pixels: &[u16],
    row: u16,
    col: u16,
) -> Result<(), DisplayError> {
    if pixels.is_empty() {
        return Ok(());
    }
    let (x0, x1) = dcs::span(col, pixels.len()).ok_or(DisplayError::InvalidArgument)?;
    if row >= config.rows() || x1 >= config.columns() {
        return Err(DisplayError::InvalidArgument);
    }
    let x0 = x0.checked_add(config.col_offset).ok_or(DisplayError::InvalidArgument)?;
    let x1 = x1.checked_add(config.col_offset).ok_or(DisplayError::InvalidArgument)?;
    let y = row.checked_add(config.row_offset).ok_or(DisplayError::InvalidArgument)?;

    bus.command(Command::ColumnAddressSet.opcode(), &dcs::window_bytes(x0, x1))
        .await?;
    bus.command(Command::RowAddressSet.opcode(), &dcs::window_bytes(y, y))
        .await?;
    bus.command(Command::MemoryWrite.opcode(), &[]).await?;
    bus.write_pixels(pixels.iter().copied()).await
}

impl<'a, B, RST, DELAY, P, T, const S: usize> DcsDisplayDriver<B, RST, DELAY, P, T, S>
where
    B: CommandBus,
    RST: OutputPin,
    DELAY: DelayNs,
    P: PixelPusher<'a>,
{
    fn precondition(&self) -> Result<(), DisplayError> {
        if !self.initialized || self.pusher.is_busy() {
            return Err(DisplayError::FailedPrecondition);
        }
        Ok(())
    }

    /// Put the address window back over the whole panel.
    async fn restore_full_window(&mut self) -> Result<(), DisplayError> {
        self.pusher.invalidate_write_mode();
        script::set_full_window(&mut self.bus, &self.config).await?;
        self.window_dirty = false;
        Ok(())
    }

    /// Expand every panel row from the framebuffer and send it.
    async fn stream_resized(
        &mut self,
        plan: &ResizePlan,
        framebuffer: &Framebuffer<'_>,
    ) -> Result<(), DisplayError> {
        self.pusher.invalidate_write_mode();
        self.window_dirty = true;
        for segment in plan.segments() {
            let source = framebuffer
                .row(segment.source_row)
                .ok_or(DisplayError::InvalidArgument)?;
            let pixels = plan.expand(&segment, source, &mut self.scratch);
            write_window_row(
                &mut self.bus,
                &self.config,
                pixels,
                segment.panel_row,
                segment.col,
            )
            .await?;
        }
        Ok(())
    }

    async fn write_resized(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        let plan = match ResizePlan::new(framebuffer.size(), self.config.columns(), self.config.rows(), S)
        {
            Ok(plan) => plan,
            Err(error) => return Err(WriteRejected::new(framebuffer, error)),
        };
        let status = self.stream_resized(&plan, &framebuffer).await;
        if let Err(_err) = status {
            #[cfg(feature = "defmt")]
            defmt::warn!("Resized write failed: {}", _err);
        }
        on_complete.complete(framebuffer, status);
        Ok(())
    }

    async fn push(
        &mut self,
        framebuffer: Framebuffer<'a>,
        mode: StreamMode,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        if self.window_dirty {
            if let Err(err) = self.restore_full_window().await {
                on_complete.complete(framebuffer, Err(err));
                return Ok(());
            }
        }
        self.pusher
            .write_framebuffer(&mut self.bus, framebuffer, mode, on_complete)
            .await
    }
}

impl<'a, B, RST, DELAY, P, T, const S: usize> DisplayDriver<'a>
    for DcsDisplayDriver<B, RST, DELAY, P, T, S>
where
    B: CommandBus,
    RST: OutputPin,
    DELAY: DelayNs,
    P: PixelPusher<'a>,
    T: Touchscreen,
{
    async fn init(&mut self) -> Result<(), DisplayError> {
        self.initialized = false;
        let result = script::run(&mut self.bus, self.reset.as_mut(), &mut self.delay, &self.config).await;
        self.pusher.invalidate_write_mode();
        if let Err(_err) = result {
            #[cfg(feature = "defmt")]
            defmt::error!("Panel init failed: {}", _err);
            return result;
        }
        self.window_dirty = !self.config.script.contains(&Step::FullWindow);
        self.initialized = true;
        #[cfg(feature = "defmt")]
        defmt::info!("Panel ready: {}x{}", self.config.width, self.config.height);
        Ok(())
    }

    async fn write_framebuffer(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        if let Err(error) = self.precondition() {
            return Err(WriteRejected::new(framebuffer, error));
        }
        if !framebuffer.is_valid() {
            return Err(WriteRejected::new(framebuffer, DisplayError::InvalidArgument));
        }
        let size = framebuffer.size();
        let panel = self.config.frame_size();
        if size == panel {
            return self.push(framebuffer, StreamMode::Direct, on_complete).await;
        }
        let doubled = Size::new(size.width.saturating_mul(2), size.height.saturating_mul(2));
        // Doubled scanlines move as 32-bit words, so odd widths take the row path.
        let even = size.width & 1 == 0;
        if self.pusher.supports_pixel_double() && doubled == panel && even {
            return self.push(framebuffer, StreamMode::PixelDouble, on_complete).await;
        }
        self.write_resized(framebuffer, on_complete).await
    }

    async fn write_row(&mut self, pixels: &[u16], row: u16, col: u16) -> Result<(), DisplayError> {
        self.precondition()?;
        self.pusher.invalidate_write_mode();
        self.window_dirty = true;
        write_window_row(&mut self.bus, &self.config, pixels, row, col).await
    }

    fn width(&self) -> u16 {
        self.config.columns()
    }

    fn height(&self) -> u16 {
        self.config.rows()
    }

    fn supports_resize(&self) -> bool {
        self.pusher.supports_pixel_double()
    }

    fn touchscreen_available(&self) -> bool {
        self.touch.available()
    }

    fn new_touch_event(&mut self) -> bool {
        self.touch.new_event()
    }

    fn touch_point(&mut self) -> TouchPoint {
        self.touch.touch_point()
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

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    use platform::mocks::{BusEvent, RecordingBus, RecordingCallback};

    use crate::bus::DcsBus;
    use crate::pusher::SpiPixelPusher;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    type TestDriver = DcsDisplayDriver<RecordingBus, NoResetPin, NoopDelay, SpiPixelPusher>;

    /// A script that only sets the full window.
    static WINDOW_ONLY: [Step; 1] = [Step::FullWindow];

    fn driver(width: u16, height: u16) -> TestDriver {
        DcsDisplayDriver::new(
            RecordingBus::new(),
            None,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(width, height, &WINDOW_ONLY),
        )
    }

    async fn ready_driver(width: u16, height: u16) -> TestDriver {
        let mut drv = driver(width, height);
        drv.init().await.unwrap();
        drv
    }

    /// TransactionStart + Write(data) + TransactionEnd for one `spi.write`.
    fn spi_device_write(data: &[u8]) -> [SpiTransaction<u8>; 3] {
        [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(data.to_vec()),
            SpiTransaction::transaction_end(),
        ]
    }

    /// Window commands and pixels as (opcode, data) / pixel events.
    fn row_events(bus: &RecordingBus) -> Vec<(u16, u16, Vec<u16>)> {
        let mut out = Vec::new();
        let mut col = 0;
        let mut row = 0;
        for event in &bus.events {
            match event {
                BusEvent::Command(0x2A, d) => col = u16::from_be_bytes([d[0], d[1]]),
                BusEvent::Command(0x2B, d) => row = u16::from_be_bytes([d[0], d[1]]),
                BusEvent::Pixels(p) => out.push((row, col, p.clone())),
                BusEvent::Command(..) => {}
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Init / reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_operations_require_init() {
        let mut drv = driver(4, 2);
        let mut pixels = [0u16; 8];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(4, 2), 8).unwrap();
        let cb = RecordingCallback::new();

        let rejected = drv.write_framebuffer(fb, &cb).await.unwrap_err();
        assert_eq!(rejected.error, DisplayError::FailedPrecondition);
        assert!(rejected.framebuffer.is_valid(), "handle comes back");

        assert_eq!(
            drv.write_row(&[1], 0, 0).await,
            Err(DisplayError::FailedPrecondition)
        );
        assert!(drv.bus().events.is_empty());
        assert_eq!(cb.count(), 0);
    }

    #[tokio::test]
    async fn test_init_runs_script_and_can_rerun() {
        let mut drv = driver(4, 2);
        drv.init().await.unwrap();
        drv.init().await.unwrap();
        assert!(drv.is_initialized());
        assert_eq!(drv.bus().opcodes(), vec![0x2A, 0x2B, 0x2A, 0x2B]);
    }

    #[tokio::test]
    async fn test_init_failure_is_reported() {
        let mut bus = RecordingBus::new();
        bus.fail_opcode = Some(0x2B);
        let mut drv: TestDriver = DcsDisplayDriver::new(
            bus,
            None,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(4, 2, &WINDOW_ONLY),
        );
        assert_eq!(drv.init().await, Err(DisplayError::Communication));
        assert!(!drv.is_initialized());
    }

    #[tokio::test]
    async fn test_reset_without_pin_is_unavailable() {
        let mut drv = ready_driver(4, 2).await;
        assert_eq!(drv.reset().await, Err(DisplayError::Unavailable));
        assert!(drv.is_initialized(), "nothing happened");
    }

    #[tokio::test]
    async fn test_reset_pulses_pin_and_requires_reinit() {
        let mut rst = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);
        let mut drv = DcsDisplayDriver::new(
            RecordingBus::new(),
            Some(rst.clone()),
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(4, 2, &WINDOW_ONLY),
        );
        drv.init().await.unwrap();
        drv.reset().await.unwrap();
        assert!(!drv.is_initialized());
        rst.done();
    }

    // -----------------------------------------------------------------------
    // write_row
    // -----------------------------------------------------------------------

    /// Row 10, col 5, three pixels: exact bytes and D/C levels on the wire.
    #[tokio::test]
    async fn test_write_row_window_addressing() {
        let spi_expectations: Vec<SpiTransaction<u8>> = [
            &spi_device_write(&[0x2A]) as &[_],
            &spi_device_write(&[0x00, 0x05, 0x00, 0x07]),
            &spi_device_write(&[0x2B]),
            &spi_device_write(&[0x00, 0x0A, 0x00, 0x0A]),
            &spi_device_write(&[0x2C]),
            &spi_device_write(&[0xF8, 0x00, 0x07, 0xE0, 0x00, 0x1F]),
        ]
        .iter()
        .flat_map(|s| s.iter().cloned())
        .collect();
        let dc_expectations = [
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ];

        let mut spi = SpiMock::new(&spi_expectations);
        let mut dc = PinMock::new(&dc_expectations);

        let mut drv = DcsDisplayDriver::new(
            DcsBus::new(spi.clone(), dc.clone()),
            None::<NoResetPin>,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(320, 240, &[]),
        );
        drv.init().await.unwrap();
        drv.write_row(&[0xF800, 0x07E0, 0x001F], 10, 5).await.unwrap();

        spi.done();
        dc.done();
    }

    #[tokio::test]
    async fn test_write_row_bounds() {
        let mut drv = ready_driver(4, 2).await;
        let before = drv.bus().events.len();

        assert_eq!(drv.write_row(&[1], 2, 0).await, Err(DisplayError::InvalidArgument));
        assert_eq!(drv.write_row(&[1], 0, 4).await, Err(DisplayError::InvalidArgument));
        assert_eq!(
            drv.write_row(&[1, 2, 3], 0, 2).await,
            Err(DisplayError::InvalidArgument),
            "run past the right edge"
        );
        assert_eq!(drv.bus().events.len(), before);

        drv.write_row(&[1, 2], 1, 2).await.unwrap();
        assert_eq!(row_events(drv.bus()), vec![(1, 2, vec![1, 2])]);
    }

    #[tokio::test]
    async fn test_write_row_applies_ram_offsets() {
        let mut config = PanelConfig::new(4, 2, &[]);
        config.col_offset = 1;
        config.row_offset = 2;
        let mut drv: TestDriver =
            DcsDisplayDriver::new(RecordingBus::new(), None, NoopDelay, SpiPixelPusher::new(), config);
        drv.init().await.unwrap();
        drv.write_row(&[9, 9], 0, 0).await.unwrap();

        assert_eq!(
            drv.bus().events[..2],
            [
                BusEvent::Command(0x2A, vec![0, 1, 0, 2]),
                BusEvent::Command(0x2B, vec![0, 2, 0, 2]),
            ]
        );
    }

    /// 4×2 panel whose controller addresses columns along the height.
    async fn swapped_driver() -> TestDriver {
        let mut config = PanelConfig::new(4, 2, &WINDOW_ONLY);
        config.swap_row_col = true;
        let mut drv =
            DcsDisplayDriver::new(RecordingBus::new(), None, NoopDelay, SpiPixelPusher::new(), config);
        drv.init().await.unwrap();
        drv
    }

    #[tokio::test]
    async fn test_swapped_row_write_stays_in_controller_window() {
        let mut drv = swapped_driver().await;
        assert_eq!((drv.width(), drv.height()), (2, 4));

        drv.write_row(&[9, 9], 3, 0).await.unwrap();

        let events = &drv.bus().events;
        assert_eq!(events[0], BusEvent::Command(0x2A, vec![0, 0, 0, 1]));
        assert_eq!(events[1], BusEvent::Command(0x2B, vec![0, 0, 0, 3]));
        assert_eq!(events[2], BusEvent::Command(0x2A, vec![0, 0, 0, 1]));
        assert_eq!(events[3], BusEvent::Command(0x2B, vec![0, 3, 0, 3]));

        assert_eq!(
            drv.write_row(&[9; 4], 1, 0).await,
            Err(DisplayError::InvalidArgument),
            "only two columns"
        );
        assert_eq!(
            drv.write_row(&[9], 4, 0).await,
            Err(DisplayError::InvalidArgument)
        );
    }

    #[tokio::test]
    async fn test_swapped_resize_walks_transposed_frame() {
        let mut drv = swapped_driver().await;
        let mut pixels = [7u16];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(1, 1), 2).unwrap();
        let cb = RecordingCallback::new();

        drv.write_framebuffer(fb, &cb).await.unwrap();

        assert_eq!(cb.calls()[0].status, Ok(()));
        let expected: Vec<_> = (0..4).map(|row| (row, 0, vec![7, 7])).collect();
        assert_eq!(row_events(drv.bus()), expected);
        assert!(drv.bus().events.iter().all(|event| match event {
            BusEvent::Command(0x2A, data) => data == &vec![0, 0, 0, 1],
            _ => true,
        }));
    }

    // -----------------------------------------------------------------------
    // write_framebuffer dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_size_frame_goes_to_pusher() {
        let mut drv = ready_driver(2, 2).await;
        let mut pixels = [1u16, 2, 3, 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();

        drv.write_framebuffer(fb, &cb).await.unwrap();

        assert_eq!(drv.bus().pixels(), vec![1, 2, 3, 4]);
        assert_eq!(drv.bus().opcodes(), vec![0x2A, 0x2B, 0x2C]);
        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Ok(()));
    }

    #[tokio::test]
    async fn test_half_size_frame_is_pixel_doubled() {
        let mut drv = ready_driver(4, 4).await;
        let mut pixels = [0xA, 0xB, 0xC, 0xD];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();

        drv.write_framebuffer(fb, &cb).await.unwrap();

        let (p, q, r, s) = (0xA, 0xB, 0xC, 0xD);
        assert_eq!(
            drv.bus().pixels(),
            vec![p, p, q, q, p, p, q, q, r, r, s, s, r, r, s, s]
        );
        assert_eq!(cb.count(), 1);
    }

    /// Framebuffer 2×1 on a 4×2 panel with a pusher that cannot double.
    #[tokio::test]
    async fn test_resize_two_by_two() {
        struct NoDouble(SpiPixelPusher);
        impl<'a> PixelPusher<'a> for NoDouble {
            fn supports_pixel_double(&self) -> bool {
                false
            }
            fn is_busy(&self) -> bool {
                false
            }
            fn invalidate_write_mode(&mut self) {
                <SpiPixelPusher as PixelPusher<'a>>::invalidate_write_mode(&mut self.0);
            }
            async fn write_framebuffer<Bus: CommandBus>(
                &mut self,
                bus: &mut Bus,
                framebuffer: Framebuffer<'a>,
                mode: StreamMode,
                on_complete: &'a dyn WriteCallback<'a>,
            ) -> Result<(), WriteRejected<'a>> {
                self.0.write_framebuffer(bus, framebuffer, mode, on_complete).await
            }
        }

        let mut drv = DcsDisplayDriver::new(
            RecordingBus::new(),
            None::<NoResetPin>,
            NoopDelay,
            NoDouble(SpiPixelPusher::new()),
            PanelConfig::new(4, 2, &WINDOW_ONLY),
        );
        drv.init().await.unwrap();
        assert!(!drv.supports_resize());
        let init_events = drv.bus().events.len();

        let mut pixels = [0xAAAA, 0xBBBB];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 1), 4).unwrap();
        let cb = RecordingCallback::new();
        drv.write_framebuffer(fb, &cb).await.unwrap();

        let mut bus = RecordingBus::new();
        bus.events = drv.bus().events[init_events..].to_vec();
        let full = vec![0xAAAA, 0xAAAA, 0xBBBB, 0xBBBB];
        assert_eq!(row_events(&bus), vec![(0, 0, full.clone()), (1, 0, full)]);
        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Ok(()));
    }

    #[tokio::test]
    async fn test_resize_splits_rows_at_scratch_width() {
        let mut drv = driver(12, 3).with_scratch::<5>();
        drv.init().await.unwrap();
        let init_events = drv.bus().events.len();

        // 4×1 → 12×3: x3, y3. Each 12-pixel row goes out as 5 + 5 + 2.
        let mut pixels = [1, 2, 3, 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(4, 1), 8).unwrap();
        let cb = RecordingCallback::new();
        drv.write_framebuffer(fb, &cb).await.unwrap();

        let mut bus = RecordingBus::new();
        bus.events = drv.bus().events[init_events..].to_vec();
        let rows = row_events(&bus);
        assert_eq!(rows.len(), 9, "3 rows × ceil(12 / 5)");
        assert_eq!(rows[0], (0, 0, vec![1, 1, 1, 2, 2]));
        assert_eq!(rows[1], (0, 5, vec![2, 3, 3, 3, 4]));
        assert_eq!(rows[2], (0, 10, vec![4, 4]));
        assert_eq!(rows[8].0, 2);
    }

    #[tokio::test]
    async fn test_non_integer_resize_rejected() {
        let mut drv = ready_driver(5, 4).await;
        let before = drv.bus().events.len();
        let mut pixels = [0u16; 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();

        let rejected = drv.write_framebuffer(fb, &cb).await.unwrap_err();

        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert_eq!(drv.bus().events.len(), before);
        assert_eq!(cb.count(), 0);
    }

    #[tokio::test]
    async fn test_resize_error_reported_once() {
        // 1×1 → 4×4 has no pixel-double path; the bus fails every row.
        let mut bus = RecordingBus::new();
        bus.fail_pixels = true;
        let mut drv = DcsDisplayDriver::new(
            bus,
            None::<NoResetPin>,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(4, 4, &WINDOW_ONLY),
        )
        .with_scratch::<2>();
        drv.init().await.unwrap();

        let mut pixels = [0u16; 1];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(1, 1), 2).unwrap();
        let cb = RecordingCallback::new();
        drv.write_framebuffer(fb, &cb).await.unwrap();

        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Err(DisplayError::Communication));
    }

    #[tokio::test]
    async fn test_invalid_framebuffer_rejected() {
        let mut drv = ready_driver(2, 2).await;
        let cb = RecordingCallback::new();
        let rejected = drv
            .write_framebuffer(Framebuffer::default(), &cb)
            .await
            .unwrap_err();
        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert_eq!(cb.count(), 0);
    }

    #[tokio::test]
    async fn test_row_write_restores_full_window_before_next_frame() {
        let mut drv = ready_driver(2, 2).await;
        drv.write_row(&[7], 1, 1).await.unwrap();

        let mut pixels = [1u16, 2, 3, 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        drv.write_framebuffer(fb, &cb).await.unwrap();

        // init window, row window + RAMWR, full window + RAMWR
        assert_eq!(
            drv.bus().opcodes(),
            vec![0x2A, 0x2B, 0x2A, 0x2B, 0x2C, 0x2A, 0x2B, 0x2C]
        );
        assert_eq!(
            drv.bus().events[6..8],
            [
                BusEvent::Command(0x2A, vec![0, 0, 0, 1]),
                BusEvent::Command(0x2B, vec![0, 0, 0, 1]),
            ]
        );
    }

    #[tokio::test]
    async fn test_touch_pass_through() {
        struct OneTap(bool);
        impl Touchscreen for OneTap {
            fn available(&self) -> bool {
                true
            }
            fn new_event(&mut self) -> bool {
                core::mem::take(&mut self.0)
            }
            fn touch_point(&mut self) -> TouchPoint {
                TouchPoint { x: 3, y: 1, pressure: 40 }
            }
        }

        let plain = driver(4, 2);
        assert!(!DisplayDriver::touchscreen_available(&plain));

        let mut drv = plain.with_touchscreen(OneTap(true));
        assert!(drv.touchscreen_available());
        assert!(drv.new_touch_event());
        assert!(!drv.new_touch_event());
        assert_eq!(drv.touch_point(), TouchPoint { x: 3, y: 1, pressure: 40 });
    }
}
