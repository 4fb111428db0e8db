//! DMA abstraction layer
//!
//! The pixel pusher drives one DMA channel that feeds a transport peripheral
//! (SPI, or a PIO-style state machine that clocks pixels out to the panel).
//! The channel raises an interrupt when a transfer completes; the pusher's
//! interrupt entry point re-arms it until the whole frame is out.

/// How pixels leave the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamMode {
    /// Pixels are emitted exactly as stored.
    #[default]
    Direct,
    /// Every pixel is emitted twice and every row is streamed twice,
    /// filling a panel twice the framebuffer size in both axes.
    PixelDouble,
}

/// DMA channel feeding the pixel transport
pub trait PixelDma {
    /// Error type
    type Error: core::fmt::Debug;

    /// Reprogram word width and state-machine program for `mode`.
    ///
    /// In [`StreamMode::PixelDouble`] the channel moves 32-bit words, two
    /// source pixels each, and the peripheral emits each pixel twice.
    fn configure(&mut self, mode: StreamMode) -> Result<(), Self::Error>;

    /// Longest transfer, in pixels, the channel accepts in one go.
    fn max_transfer_pixels(&self) -> usize {
        usize::MAX
    }

    /// Arm and trigger a transfer of `pixels` pixels starting at `source`.
    ///
    /// # Safety
    ///
    /// `source..source + pixels` must stay valid and unmodified until the
    /// completion interrupt for this transfer has been acknowledged.
    unsafe fn start(&mut self, source: *const u16, pixels: usize) -> Result<(), Self::Error>;

    /// Check if a transfer is still running
    fn is_busy(&self) -> bool;

    /// Clear this channel's completion interrupt.
    ///
    /// Returns `false` when the channel did not raise it (shared IRQ lines).
    fn acknowledge_irq(&mut self) -> bool;
}

/// One DMA transfer of a frame, as an offset into the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// First pixel, counted from the start of the buffer
    pub offset: usize,
    /// Pixels in this transfer
    pub len: usize,
}

/// Walks a frame as a sequence of DMA transfers.
///
/// A frame is a list of *runs*: one run for a packed buffer in direct mode,
/// one run per row for a padded buffer, or one run per output scanline when
/// pixel-doubling (scanline `s` re-reads source row `s / 2`). Runs longer
/// than the channel limit are split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanCursor {
    mode: StreamMode,
    width: usize,
    height: usize,
    stride: usize,
    contiguous: bool,
    max_chunk: usize,
    current_scanline: usize,
    offset: usize,
}

impl ScanCursor {
    /// Cursor at the start of a frame.
    ///
    /// `max_chunk` is the channel limit in pixels; pixel-double chunks are
    /// rounded down to whole 32-bit words.
    pub fn new(
        mode: StreamMode,
        width: usize,
        height: usize,
        stride: usize,
        max_chunk: usize,
    ) -> Self {
        let max_chunk = match mode {
            StreamMode::Direct => max_chunk.max(1),
            StreamMode::PixelDouble => (max_chunk & !1).max(2),
        };
        Self {
            mode,
            width,
            height,
            stride,
            contiguous: width == stride,
            max_chunk,
            current_scanline: 0,
            offset: 0,
        }
    }

    /// Index of the run being streamed (the output scanline when doubling).
    pub fn current_scanline(&self) -> usize {
        self.current_scanline
    }

    fn runs(&self) -> usize {
        match self.mode {
            StreamMode::Direct if self.contiguous => usize::from(self.height > 0),
            StreamMode::Direct => self.height,
            StreamMode::PixelDouble => self.height.saturating_mul(2),
        }
    }

    fn run_len(&self) -> usize {
        match self.mode {
            StreamMode::Direct if self.contiguous => self.width.saturating_mul(self.height),
            _ => self.width,
        }
    }

    fn run_start(&self, run: usize) -> Option<usize> {
        let row = match self.mode {
            StreamMode::Direct if self.contiguous => 0,
            StreamMode::Direct => run,
            StreamMode::PixelDouble => run / 2,
        };
        self.stride.checked_mul(row)
    }

    /// Next transfer, or `None` once the frame is complete.
    pub fn segment(&self) -> Option<Segment> {
        if self.current_scanline >= self.runs() || self.run_len() == 0 {
            return None;
        }
        let remaining = self.run_len().checked_sub(self.offset)?;
        let offset = self.run_start(self.current_scanline)?.checked_add(self.offset)?;
        Some(Segment {
            offset,
            len: remaining.min(self.max_chunk),
        })
    }

    /// Record that `len` pixels of the current run went out.
    pub fn advance(&mut self, len: usize) {
        self.offset = self.offset.saturating_add(len);
        if self.offset >= self.run_len() {
            self.offset = 0;
            self.current_scanline = self.current_scanline.saturating_add(1);
        }
    }

    /// `true` once every run has been streamed.
    pub fn is_done(&self) -> bool {
        self.segment().is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn walk(mut cursor: ScanCursor) -> Vec<Segment> {
        let mut out = Vec::new();
        while let Some(seg) = cursor.segment() {
            out.push(seg);
            cursor.advance(seg.len);
        }
        out
    }

    #[test]
    fn test_direct_packed_is_one_transfer() {
        let segs = walk(ScanCursor::new(StreamMode::Direct, 4, 3, 4, usize::MAX));
        assert_eq!(segs, vec![Segment { offset: 0, len: 12 }]);
    }

    #[test]
    fn test_direct_chunks_respect_channel_limit() {
        let segs = walk(ScanCursor::new(StreamMode::Direct, 4, 3, 4, 5));
        let lens: Vec<_> = segs.iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![5, 5, 2]);
        assert_eq!(segs[1].offset, 5);
        assert_eq!(segs[2].offset, 10);
    }

    #[test]
    fn test_direct_padded_streams_rows() {
        let segs = walk(ScanCursor::new(StreamMode::Direct, 2, 2, 3, usize::MAX));
        assert_eq!(
            segs,
            vec![Segment { offset: 0, len: 2 }, Segment { offset: 3, len: 2 }]
        );
    }

    #[test]
    fn test_pixel_double_rereads_each_row() {
        let segs = walk(ScanCursor::new(StreamMode::PixelDouble, 2, 2, 2, usize::MAX));
        let offsets: Vec<_> = segs.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 0, 2, 2], "scanline s reads source row s/2");
        assert!(segs.iter().all(|s| s.len == 2));
    }

    #[test]
    fn test_pixel_double_chunk_is_whole_words() {
        let segs = walk(ScanCursor::new(StreamMode::PixelDouble, 6, 1, 6, 5));
        let lens: Vec<_> = segs.iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![4, 2, 4, 2]);
    }

    #[test]
    fn test_scanline_cursor_advances() {
        let mut c = ScanCursor::new(StreamMode::PixelDouble, 2, 2, 2, usize::MAX);
        assert_eq!(c.current_scanline(), 0);
        c.advance(2);
        assert_eq!(c.current_scanline(), 1);
        c.advance(2);
        c.advance(2);
        c.advance(2);
        assert_eq!(c.current_scanline(), 4);
        assert!(c.is_done());
    }

    #[test]
    fn test_empty_frame_is_done() {
        assert!(ScanCursor::new(StreamMode::Direct, 0, 0, 0, 8).is_done());
    }
}
