//! MIPI-DSI display driver
//!
//! DSI hosts scan frames straight out of memory, so there is no pixel
//! pusher: the host is told the framebuffer addresses once at init and each
//! write just points it at one of them. Only whole frames at panel size are
//! supported.
//!
//! ```text
//! init:  script ──► host DCS channel
//!        pool buffers ──► host.register_framebuffers
//! write: framebuffer ──► host.present ──► frame-done IRQ ──► on_complete
//! ```

use core::ptr::NonNull;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_graphics::geometry::Size;
use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

use platform::{
    CommandBus, DisplayDriver, DisplayError, Framebuffer, FramebufferPool, NoTouchscreen,
    TouchPoint, Touchscreen, WriteCallback, WriteRejected,
};

use crate::config::PanelConfig;
use crate::driver::NoResetPin;
use crate::script;

/// Framebuffers a DSI host can have registered at once.
pub const MAX_FRAMEBUFFERS: usize = 4;

/// DSI host controller.
///
/// The [`CommandBus`] half carries DCS commands in low-power mode; the rest
/// drives video-mode scan-out.
pub trait DsiHost<'a>: CommandBus {
    /// Tell the host which buffers it may scan out.
    fn register_framebuffers(
        &mut self,
        buffers: &[NonNull<u16>],
        size: Size,
        row_bytes: usize,
    ) -> Result<(), DisplayError>;

    /// `true` while a presented frame has not finished scanning out.
    fn is_busy(&self) -> bool;

    /// Scan out `framebuffer`; the host invokes `on_complete` from its
    /// frame-done interrupt.
    fn present(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>>;
}

/// Driver for command-mode-initialised, video-mode DSI panels.
pub struct MipiDsiDriver<H, DELAY, T = NoTouchscreen> {
    host: H,
    delay: DELAY,
    touch: T,
    config: PanelConfig,
    buffers: Vec<NonNull<u16>, MAX_FRAMEBUFFERS>,
    framebuffer_size: Size,
    row_bytes: usize,
    initialized: bool,
}

impl<H: CommandBus, DELAY: DelayNs> MipiDsiDriver<H, DELAY> {
    /// Create a driver; attach the frame pool before `init`.
    pub fn new(host: H, delay: DELAY, config: PanelConfig) -> Self {
        Self {
            host,
            delay,
            touch: NoTouchscreen,
            config,
            buffers: Vec::new(),
            framebuffer_size: Size::zero(),
            row_bytes: 0,
            initialized: false,
        }
    }
}

impl<H: CommandBus, DELAY: DelayNs, T> MipiDsiDriver<H, DELAY, T> {
    /// Remember the pool's buffers for registration at `init`.
    ///
    /// Fails with `ResourceExhausted` when the pool holds more than
    /// [`MAX_FRAMEBUFFERS`] buffers.
    pub fn with_framebuffers<M: RawMutex, const N: usize>(
        mut self,
        pool: &FramebufferPool<'_, M, N>,
    ) -> Result<Self, DisplayError> {
        self.buffers.clear();
        self.buffers
            .extend_from_slice(pool.buffers_for_init_only())
            .map_err(|_| DisplayError::ResourceExhausted)?;
        self.framebuffer_size = pool.framebuffer_size();
        self.row_bytes = pool.row_bytes();
        Ok(self)
    }

    /// Attach a touch controller.
    pub fn with_touchscreen<T2: Touchscreen>(self, touch: T2) -> MipiDsiDriver<H, DELAY, T2> {
        MipiDsiDriver {
            host: self.host,
            delay: self.delay,
            touch,
            config: self.config,
            buffers: self.buffers,
            framebuffer_size: self.framebuffer_size,
            row_bytes: self.row_bytes,
            initialized: self.initialized,
        }
    }

    /// The DSI host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the DSI host, e.g. to service its interrupt.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    fn panel_size(&self) -> Size {
        self.config.frame_size()
    }

    fn is_registered(&self, framebuffer: &Framebuffer<'_>) -> bool {
        self.buffers
            .iter()
            .any(|b| core::ptr::eq(b.as_ptr().cast_const(), framebuffer.as_ptr()))
    }
}

impl<'a, H, DELAY, T> DisplayDriver<'a> for MipiDsiDriver<H, DELAY, T>
where
    H: DsiHost<'a>,
    DELAY: DelayNs,
    T: Touchscreen,
{
    async fn init(&mut self) -> Result<(), DisplayError> {
        self.initialized = false;
        script::run(
            &mut self.host,
            None::<&mut NoResetPin>,
            &mut self.delay,
            &self.config,
        )
        .await?;
        if !self.buffers.is_empty() {
            self.host
                .register_framebuffers(&self.buffers, self.framebuffer_size, self.row_bytes)?;
        }
        self.initialized = true;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "DSI panel ready, {} framebuffers registered",
            self.buffers.len()
        );
        Ok(())
    }

    async fn write_framebuffer(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        if !self.initialized || self.host.is_busy() {
            return Err(WriteRejected::new(framebuffer, DisplayError::FailedPrecondition));
        }
        if !framebuffer.is_valid()
            || framebuffer.size() != self.panel_size()
            || !self.is_registered(&framebuffer)
        {
            return Err(WriteRejected::new(framebuffer, DisplayError::InvalidArgument));
        }
        self.host.present(framebuffer, on_complete)
    }

    async fn write_row(&mut self, _pixels: &[u16], _row: u16, _col: u16) -> Result<(), DisplayError> {
        Err(DisplayError::Unimplemented)
    }

    fn width(&self) -> u16 {
        self.config.columns()
    }

    fn height(&self) -> u16 {
        self.config.rows()
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

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use platform::mocks::{RecordingBus, RecordingCallback};

    use crate::controllers;

    type Pool<'a, const N: usize> = FramebufferPool<'a, CriticalSectionRawMutex, N>;

    /// Host that records DCS traffic and holds one presented frame.
    #[derive(Default)]
    struct MockHost<'a> {
        bus: RecordingBus,
        registered: std::vec::Vec<usize>,
        registered_size: Size,
        pending: Option<(Framebuffer<'a>, &'a dyn WriteCallback<'a>)>,
    }

    impl MockHost<'_> {
        fn frame_done(&mut self) {
            if let Some((fb, cb)) = self.pending.take() {
                cb.complete(fb, Ok(()));
            }
        }
    }

    impl CommandBus for MockHost<'_> {
        async fn command(&mut self, opcode: u8, data: &[u8]) -> Result<(), DisplayError> {
            self.bus.command(opcode, data).await
        }

        async fn write_pixels<I>(&mut self, pixels: I) -> Result<(), DisplayError>
        where
            I: IntoIterator<Item = u16>,
        {
            self.bus.write_pixels(pixels).await
        }
    }

    impl<'a> DsiHost<'a> for MockHost<'a> {
        fn register_framebuffers(
            &mut self,
            buffers: &[NonNull<u16>],
            size: Size,
            _row_bytes: usize,
        ) -> Result<(), DisplayError> {
            self.registered = buffers.iter().map(|b| b.as_ptr() as usize).collect();
            self.registered_size = size;
            Ok(())
        }

        fn is_busy(&self) -> bool {
            self.pending.is_some()
        }

        fn present(
            &mut self,
            framebuffer: Framebuffer<'a>,
            on_complete: &'a dyn WriteCallback<'a>,
        ) -> Result<(), WriteRejected<'a>> {
            self.pending = Some((framebuffer, on_complete));
            Ok(())
        }
    }

    fn rm67162() -> PanelConfig {
        PanelConfig::rm67162()
    }

    #[tokio::test]
    async fn test_init_runs_script_and_registers_pool() {
        let mut a = vec![0u16; 536 * 240];
        let mut b = vec![0u16; 536 * 240];
        let addrs = [a.as_ptr() as usize, b.as_ptr() as usize];
        let pool: Pool<'_, 2> =
            Pool::new([&mut a[..], &mut b[..]], Size::new(536, 240), 536 * 2).unwrap();

        let mut drv = MipiDsiDriver::new(MockHost::default(), NoopDelay, rm67162())
            .with_framebuffers(&pool)
            .unwrap();
        drv.init().await.unwrap();

        assert_eq!(drv.host().registered, addrs);
        assert_eq!(drv.host().registered_size, Size::new(536, 240));
        let opcodes = drv.host().bus.opcodes();
        assert_eq!(opcodes.first(), Some(&0x01), "soft reset first");
        assert_eq!(opcodes.last(), Some(&0x2C), "ends in memory write");
        assert_eq!(controllers::RM67162.len(), drv.config.script.len());
    }

    #[tokio::test]
    async fn test_frame_is_presented_and_completed_by_host() {
        let mut a = vec![0u16; 536 * 240];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(536, 240), 536 * 2).unwrap();
        let mut drv = MipiDsiDriver::new(MockHost::default(), NoopDelay, rm67162())
            .with_framebuffers(&pool)
            .unwrap();
        drv.init().await.unwrap();

        let fb = pool.try_get_framebuffer().unwrap();
        drv.write_framebuffer(fb, &pool).await.unwrap();
        assert!(drv.host().is_busy());
        assert_eq!(pool.available(), 0);

        drv.host_mut().frame_done();
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_wrong_size_and_unregistered_rejected() {
        let mut a = vec![0u16; 536 * 240];
        let mut small = [0u16; 4];
        let mut stray = vec![0u16; 536 * 240];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(536, 240), 536 * 2).unwrap();
        let cb = RecordingCallback::new();
        let mut drv = MipiDsiDriver::new(MockHost::default(), NoopDelay, rm67162())
            .with_framebuffers(&pool)
            .unwrap();
        drv.init().await.unwrap();

        let fb = Framebuffer::from_slice(&mut small, Size::new(2, 2), 4).unwrap();
        let rejected = drv.write_framebuffer(fb, &cb).await.unwrap_err();
        assert_eq!(rejected.error, DisplayError::InvalidArgument);

        let fb = Framebuffer::from_slice(&mut stray, Size::new(536, 240), 536 * 2).unwrap();
        let rejected = drv.write_framebuffer(fb, &cb).await.unwrap_err();
        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert!(!drv.host().is_busy());
        assert_eq!(cb.count(), 0);
    }

    #[tokio::test]
    async fn test_write_row_is_unimplemented() {
        let mut drv = MipiDsiDriver::new(MockHost::default(), NoopDelay, rm67162());
        drv.init().await.unwrap();
        assert_eq!(
            drv.write_row(&[0; 4], 0, 0).await,
            Err(DisplayError::Unimplemented)
        );
        assert!(!drv.supports_resize());
    }

    #[test]
    fn test_oversized_pool_rejected() {
        let mut bufs = [[0u16; 4]; MAX_FRAMEBUFFERS + 1];
        let [a, b, c, d, e] = &mut bufs;
        let pool: Pool<'_, 5> = Pool::new(
            [&mut a[..], &mut b[..], &mut c[..], &mut d[..], &mut e[..]],
            Size::new(2, 2),
            4,
        )
        .unwrap();
        let result = MipiDsiDriver::new(MockHost::default(), NoopDelay, rm67162())
            .with_framebuffers(&pool);
        assert!(matches!(result, Err(DisplayError::ResourceExhausted)));
    }
}
