//! Display facade
//!
//! The single entry point an application renders through: acquire a
//! framebuffer from the pool, draw, release it. Releasing sends the frame to
//! the panel, and the pool takes the buffer back once the transport is done
//! with it.
//!
//! ```text
//!  get_framebuffer() ──► draw ──► release_framebuffer(fb)
//!        ▲                               │
//!        │                     driver.write_framebuffer(fb, pool)
//!        │                               │
//!        └──── pool.complete(fb) ◄───────┘  (thread or IRQ)
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;

use platform::{
    DisplayDriver, DisplayError, Framebuffer, FramebufferPool, TouchPoint, WriteRejected,
};

/// A panel driver bound to its framebuffer pool.
pub struct Display<'a, D, M: RawMutex, const N: usize> {
    driver: D,
    pool: &'a FramebufferPool<'a, M, N>,
}

impl<'a, D, M, const N: usize> Display<'a, D, M, N>
where
    D: DisplayDriver<'a>,
    M: RawMutex + Sync,
{
    /// Bind `driver` to `pool`.
    pub fn new(driver: D, pool: &'a FramebufferPool<'a, M, N>) -> Self {
        Self { driver, pool }
    }

    /// Initialise the panel.
    pub async fn init(&mut self) -> Result<(), DisplayError> {
        self.driver.init().await
    }

    /// Wait for a free framebuffer.
    ///
    /// Suspends while every buffer is held by the application or in flight.
    pub async fn get_framebuffer(&self) -> Framebuffer<'a> {
        self.pool.get_framebuffer().await
    }

    /// Take a free framebuffer without waiting (`ResourceExhausted` if none).
    pub fn try_get_framebuffer(&self) -> Result<Framebuffer<'a>, DisplayError> {
        self.pool.try_get_framebuffer()
    }

    /// Send `framebuffer` to the panel.
    ///
    /// The buffer returns to the pool when the write completes, whether or
    /// not it succeeded. A refused write hands the framebuffer back.
    pub async fn release_framebuffer(
        &mut self,
        framebuffer: Framebuffer<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        if !framebuffer.is_valid() {
            return Err(WriteRejected::new(framebuffer, DisplayError::InvalidArgument));
        }
        self.driver.write_framebuffer(framebuffer, self.pool).await
    }

    /// Panel width in pixels
    pub fn width(&self) -> u16 {
        self.driver.width()
    }

    /// Panel height in pixels
    pub fn height(&self) -> u16 {
        self.driver.height()
    }

    /// Whether a touch controller is attached.
    pub fn touchscreen_available(&self) -> bool {
        self.driver.touchscreen_available()
    }

    /// Whether a touch event arrived since the last call.
    pub fn new_touch_event(&mut self) -> bool {
        self.driver.new_touch_event()
    }

    /// Latest touch point.
    pub fn touch_point(&mut self) -> TouchPoint {
        self.driver.touch_point()
    }

    /// The framebuffer pool
    pub fn pool(&self) -> &'a FramebufferPool<'a, M, N> {
        self.pool
    }

    /// The panel driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the panel driver, e.g. to service its interrupts.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
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
    use embedded_graphics::geometry::Size;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use platform::mocks::RecordingBus;

    use crate::config::PanelConfig;
    use crate::driver::{DcsDisplayDriver, NoResetPin};
    use crate::null::NullDisplayDriver;
    use crate::pusher::SpiPixelPusher;
    use crate::script::Step;

    type Pool<'a, const N: usize> = FramebufferPool<'a, CriticalSectionRawMutex, N>;

    static WINDOW_ONLY: [Step; 1] = [Step::FullWindow];

    /// Acquire, fill, release, acquire again without blocking.
    #[tokio::test]
    async fn test_fill_release_reacquire() {
        let mut a = [0u16; 16];
        let mut b = [0u16; 16];
        let pool: Pool<'_, 2> =
            Pool::new([&mut a[..], &mut b[..]], Size::new(4, 4), 8).unwrap();
        let mut display = Display::new(NullDisplayDriver::new(4, 4), &pool);
        display.init().await.unwrap();

        let mut fb = display.get_framebuffer().await;
        fb.fill(0xF800);
        display.release_framebuffer(fb).await.unwrap();

        let first = display.try_get_framebuffer().unwrap();
        let second = display.try_get_framebuffer().unwrap();
        assert_ne!(first.as_ptr(), second.as_ptr());
        assert!(pool
            .buffers_for_init_only()
            .iter()
            .any(|p| core::ptr::eq(p.as_ptr().cast_const(), first.as_ptr())));
    }

    #[tokio::test]
    async fn test_frames_reach_the_panel_and_return_to_the_pool() {
        let mut a = [0u16; 4];
        let mut b = [0u16; 4];
        let pool: Pool<'_, 2> = Pool::new([&mut a[..], &mut b[..]], Size::new(2, 2), 4).unwrap();
        let driver = DcsDisplayDriver::new(
            RecordingBus::new(),
            None::<NoResetPin>,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(2, 2, &WINDOW_ONLY),
        );
        let mut display = Display::new(driver, &pool);
        display.init().await.unwrap();
        assert_eq!((display.width(), display.height()), (2, 2));

        let mut fb = display.get_framebuffer().await;
        fb.fill(0x07E0);
        display.release_framebuffer(fb).await.unwrap();

        assert_eq!(pool.available(), 2);
        assert_eq!(display.driver().bus().pixels(), vec![0x07E0; 4]);
    }

    #[tokio::test]
    async fn test_failed_write_still_returns_buffer() {
        let mut a = [0u16; 4];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let mut bus = RecordingBus::new();
        bus.fail_pixels = true;
        let driver = DcsDisplayDriver::new(
            bus,
            None::<NoResetPin>,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(2, 2, &WINDOW_ONLY),
        );
        let mut display = Display::new(driver, &pool);
        display.init().await.unwrap();

        let fb = display.get_framebuffer().await;
        display.release_framebuffer(fb).await.unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_invalid_handle_rejected_without_consuming_a_slot() {
        let mut a = [0u16; 4];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let mut display = Display::new(NullDisplayDriver::new(2, 2), &pool);
        display.init().await.unwrap();

        let rejected = display
            .release_framebuffer(Framebuffer::default())
            .await
            .unwrap_err();
        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert!(!rejected.framebuffer.is_valid());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_refused_write_hands_framebuffer_back() {
        let mut a = [0u16; 4];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let driver = DcsDisplayDriver::new(
            RecordingBus::new(),
            None::<NoResetPin>,
            NoopDelay,
            SpiPixelPusher::new(),
            PanelConfig::new(2, 2, &WINDOW_ONLY),
        );
        // No init: the driver refuses.
        let mut display = Display::new(driver, &pool);

        let fb = display.try_get_framebuffer().unwrap();
        let addr = fb.as_ptr();
        let rejected = display.release_framebuffer(fb).await.unwrap_err();
        assert_eq!(rejected.error, DisplayError::FailedPrecondition);
        assert_eq!(rejected.framebuffer.as_ptr(), addr);
        assert_eq!(pool.available(), 0, "caller still holds the buffer");

        pool.release_framebuffer(rejected.framebuffer);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_touch_defaults() {
        let mut a = [0u16; 4];
        let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let mut display = Display::new(NullDisplayDriver::new(2, 2), &pool);
        assert!(!display.touchscreen_available());
        assert!(!display.new_touch_event());
        assert_eq!(display.touch_point(), TouchPoint::default());
    }
}
