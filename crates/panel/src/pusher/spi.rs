//! CPU-driven pixel pusher

use platform::{
    CommandBus, DisplayError, Framebuffer, PixelPusher, StreamMode, WriteCallback, WriteRejected,
};

use crate::dcs::Command;

/// Streams framebuffers through the command bus on the calling task.
///
/// Pixel doubling is done on the fly by repeating every pixel and every row.
/// The completion callback runs before `write_framebuffer` returns.
#[derive(Debug, Default)]
pub struct SpiPixelPusher {
    write_mode_configured: bool,
}

impl SpiPixelPusher {
    /// Pusher that will send memory-write before its first frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next frame can skip the memory-write opcode.
    pub fn write_mode_configured(&self) -> bool {
        self.write_mode_configured
    }

    async fn stream<B: CommandBus>(
        &mut self,
        bus: &mut B,
        framebuffer: &Framebuffer<'_>,
        mode: StreamMode,
    ) -> Result<(), DisplayError> {
        if !self.write_mode_configured {
            bus.command(Command::MemoryWrite.opcode(), &[]).await?;
            self.write_mode_configured = true;
        }
        let rows = usize::try_from(framebuffer.size().height).unwrap_or(0);
        match mode {
            StreamMode::Direct => {
                let pixels = (0..rows)
                    .filter_map(|y| framebuffer.row(y))
                    .flat_map(|row| row.iter().copied());
                bus.write_pixels(pixels).await
            }
            StreamMode::PixelDouble => {
                let pixels = (0..rows.saturating_mul(2))
                    .filter_map(|scanline| framebuffer.row(scanline / 2))
                    .flat_map(|row| row.iter().flat_map(|&p| [p, p]));
                bus.write_pixels(pixels).await
            }
        }
    }
}

impl<'a> PixelPusher<'a> for SpiPixelPusher {
    fn supports_pixel_double(&self) -> bool {
        true
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn invalidate_write_mode(&mut self) {
        self.write_mode_configured = false;
    }

    async fn write_framebuffer<B: CommandBus>(
        &mut self,
        bus: &mut B,
        framebuffer: Framebuffer<'a>,
        mode: StreamMode,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        if !framebuffer.is_valid() {
            return Err(WriteRejected::new(framebuffer, DisplayError::InvalidArgument));
        }
        let status = self.stream(bus, &framebuffer, mode).await;
        if status.is_err() {
            // The controller may be mid-frame; start the next one afresh.
            self.write_mode_configured = false;
        }
        on_complete.complete(framebuffer, status);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    use embedded_graphics::geometry::Size;
    use platform::mocks::{BusEvent, RecordingBus, RecordingCallback};

    #[tokio::test]
    async fn test_direct_frame_is_preceded_by_memory_write() {
        let mut pixels = [1u16, 2, 3, 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let mut pusher = SpiPixelPusher::new();

        pusher
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert_eq!(
            bus.events,
            vec![
                BusEvent::Command(0x2C, vec![]),
                BusEvent::Pixels(vec![1, 2, 3, 4]),
            ]
        );
        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Ok(()));
        assert!(pusher.write_mode_configured());
    }

    #[tokio::test]
    async fn test_second_frame_skips_memory_write() {
        let mut a = [7u16; 4];
        let mut b = [8u16; 4];
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let mut pusher = SpiPixelPusher::new();

        let fb = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
        pusher.write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb).await.unwrap();
        let fb = Framebuffer::from_slice(&mut b, Size::new(2, 2), 4).unwrap();
        pusher.write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb).await.unwrap();

        assert_eq!(bus.opcodes(), vec![0x2C]);

        <SpiPixelPusher as PixelPusher<'_>>::invalidate_write_mode(&mut pusher);
        let fb = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
        pusher.write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb).await.unwrap();
        assert_eq!(bus.opcodes(), vec![0x2C, 0x2C]);
    }

    #[tokio::test]
    async fn test_pixel_double_repeats_pixels_and_rows() {
        // [[P, Q], [R, S]]
        let mut pixels = [0x1111u16, 0x2222, 0x3333, 0x4444];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let mut pusher = SpiPixelPusher::new();

        pusher
            .write_framebuffer(&mut bus, fb, StreamMode::PixelDouble, &cb)
            .await
            .unwrap();

        let (p, q, r, s) = (0x1111, 0x2222, 0x3333, 0x4444);
        assert_eq!(
            bus.pixels(),
            vec![p, p, q, q, p, p, q, q, r, r, s, s, r, r, s, s]
        );
    }

    #[tokio::test]
    async fn test_padded_rows_skip_padding() {
        // 2×2 with one pixel of padding per row.
        let mut pixels = [1u16, 2, 0xDEAD, 3, 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 6).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();

        SpiPixelPusher::new()
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert_eq!(bus.pixels(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_transport_error_reaches_callback() {
        let mut pixels = [0u16; 4];
        let addr = pixels.as_ptr() as usize;
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        bus.fail_pixels = true;
        let mut pusher = SpiPixelPusher::new();

        pusher
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        let calls = cb.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, addr, "callback gets the moved-in buffer");
        assert_eq!(calls[0].status, Err(DisplayError::Communication));
        assert!(!pusher.write_mode_configured());
    }

    #[tokio::test]
    async fn test_invalid_framebuffer_rejected() {
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();

        let rejected = SpiPixelPusher::new()
            .write_framebuffer(&mut bus, Framebuffer::default(), StreamMode::Direct, &cb)
            .await
            .unwrap_err();

        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert!(bus.events.is_empty());
        assert_eq!(cb.count(), 0);
    }
}
