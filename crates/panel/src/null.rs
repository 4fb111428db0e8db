//! Headless display driver

use platform::{DisplayDriver, DisplayError, Framebuffer, WriteCallback, WriteRejected};

/// Accepts every frame and hands it straight back through the callback.
///
/// Stands in for a panel on headless builds so the render loop keeps cycling
/// buffers through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NullDisplayDriver {
    width: u16,
    height: u16,
}

impl NullDisplayDriver {
    /// A headless "panel" of the given size.
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl<'a> DisplayDriver<'a> for NullDisplayDriver {
    async fn init(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    async fn write_framebuffer(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        on_complete.complete(framebuffer, Ok(()));
        Ok(())
    }

    async fn write_row(&mut self, _pixels: &[u16], _row: u16, _col: u16) -> Result<(), DisplayError> {
        Ok(())
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    use embedded_graphics::geometry::Size;
    use platform::mocks::RecordingCallback;

    #[tokio::test]
    async fn test_completes_immediately() {
        let mut drv = NullDisplayDriver::new(4, 2);
        drv.init().await.unwrap();

        let mut pixels = [0u16; 8];
        let addr = pixels.as_ptr() as usize;
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(4, 2), 8).unwrap();
        let cb = RecordingCallback::new();
        drv.write_framebuffer(fb, &cb).await.unwrap();

        let calls = cb.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, addr);
        assert_eq!(calls[0].status, Ok(()));
        assert_eq!(drv.write_row(&[1, 2], 0, 0).await, Ok(()));
        assert_eq!((drv.width(), drv.height()), (4, 2));
    }
}
