//! Integer upscaling through per-row writes
//!
//! When a framebuffer is smaller than the panel and the transport cannot
//! upscale, the driver expands each source row into a scratch line and sends
//! it with `write_row`. [`ResizePlan`] validates the scale and enumerates
//! those writes in panel row-major order.

use embedded_graphics::geometry::Size;

use platform::DisplayError;

/// One `write_row` call of a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RowSegment {
    /// Panel row written
    pub panel_row: u16,
    /// Framebuffer row it is expanded from
    pub source_row: usize,
    /// First panel column written
    pub col: u16,
    /// Pixels written
    pub len: usize,
}

/// Validated integer scale from a framebuffer to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResizePlan {
    x_scale: u16,
    y_scale: u16,
    panel_width: u16,
    panel_height: u16,
    chunk: usize,
}

impl ResizePlan {
    /// Plan a resize of a `source` framebuffer onto a `panel_width` ×
    /// `panel_height` panel with a scratch line of `scratch_len` pixels.
    ///
    /// Fails with `InvalidArgument` unless both panel dimensions are whole
    /// multiples (≥ 1) of the framebuffer dimensions and the scratch line is
    /// non-empty.
    pub fn new(
        source: Size,
        panel_width: u16,
        panel_height: u16,
        scratch_len: usize,
    ) -> Result<Self, DisplayError> {
        let x_scale = Self::scale(source.width, panel_width)?;
        let y_scale = Self::scale(source.height, panel_height)?;
        if scratch_len == 0 {
            return Err(DisplayError::InvalidArgument);
        }
        Ok(Self {
            x_scale,
            y_scale,
            panel_width,
            panel_height,
            chunk: scratch_len.min(usize::from(panel_width)),
        })
    }

    fn scale(source: u32, panel: u16) -> Result<u16, DisplayError> {
        let source = u16::try_from(source).map_err(|_| DisplayError::InvalidArgument)?;
        match (panel.checked_div(source), panel.checked_rem(source)) {
            (Some(scale), Some(0)) if scale >= 1 => Ok(scale),
            _ => Err(DisplayError::InvalidArgument),
        }
    }

    /// Horizontal repeat factor
    pub fn x_scale(&self) -> u16 {
        self.x_scale
    }

    /// Vertical repeat factor
    pub fn y_scale(&self) -> u16 {
        self.y_scale
    }

    /// Pixels per `write_row` call at most.
    pub fn chunk_len(&self) -> usize {
        self.chunk
    }

    /// Number of `write_row` calls: `h · ry · ceil(w · rx / chunk)`.
    pub fn write_count(&self) -> usize {
        usize::from(self.panel_height).saturating_mul(self.chunks_per_row())
    }

    fn chunks_per_row(&self) -> usize {
        usize::from(self.panel_width).div_ceil(self.chunk)
    }

    /// Every write, panel row-major, columns ascending.
    pub fn segments(&self) -> impl Iterator<Item = RowSegment> + '_ {
        let chunk = self.chunk;
        (0..self.panel_height).flat_map(move |panel_row| {
            let source_row = usize::from(panel_row.checked_div(self.y_scale).unwrap_or(0));
            (0..usize::from(self.panel_width))
                .step_by(chunk)
                .map(move |start| RowSegment {
                    panel_row,
                    source_row,
                    col: u16::try_from(start).unwrap_or(u16::MAX),
                    len: chunk.min(usize::from(self.panel_width).saturating_sub(start)),
                })
        })
    }

    /// Fill `scratch` with the expanded pixels of `segment` taken from
    /// `source_row`; returns the filled prefix.
    pub fn expand<'s>(
        &self,
        segment: &RowSegment,
        source_row: &[u16],
        scratch: &'s mut [u16],
    ) -> &'s [u16] {
        let len = segment.len.min(scratch.len());
        let scale = usize::from(self.x_scale);
        let start = usize::from(segment.col);
        for (offset, slot) in scratch.iter_mut().take(len).enumerate() {
            let column = start.saturating_add(offset).checked_div(scale).unwrap_or(0);
            *slot = source_row.get(column).copied().unwrap_or(0);
        }
        scratch.get(..len).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_by_two_plan() {
        let plan = ResizePlan::new(Size::new(2, 1), 4, 2, 80).unwrap();
        assert_eq!((plan.x_scale(), plan.y_scale()), (2, 2));
        assert_eq!(plan.write_count(), 2);

        let segs: Vec<_> = plan.segments().collect();
        assert_eq!(
            segs,
            vec![
                RowSegment { panel_row: 0, source_row: 0, col: 0, len: 4 },
                RowSegment { panel_row: 1, source_row: 0, col: 0, len: 4 },
            ]
        );

        let mut scratch = [0u16; 80];
        let row = [0xAAAA, 0xBBBB];
        assert_eq!(
            plan.expand(&segs[0], &row, &mut scratch),
            &[0xAAAA, 0xAAAA, 0xBBBB, 0xBBBB]
        );
    }

    #[test]
    fn test_rows_split_at_scratch_capacity() {
        // 10 wide ×3 = 30 panel columns through a 8-pixel scratch: 8, 8, 8, 6.
        let plan = ResizePlan::new(Size::new(10, 1), 30, 1, 8).unwrap();
        let segs: Vec<_> = plan.segments().collect();
        let cols: Vec<_> = segs.iter().map(|s| (s.col, s.len)).collect();
        assert_eq!(cols, vec![(0, 8), (8, 8), (16, 8), (24, 6)]);

        let row: Vec<u16> = (0..10).collect();
        let mut scratch = [0u16; 8];
        assert_eq!(plan.expand(&segs[1], &row, &mut scratch), &[2, 3, 3, 3, 4, 4, 4, 5]);
        assert_eq!(plan.expand(&segs[3], &row, &mut scratch), &[8, 8, 8, 9, 9, 9]);
    }

    #[test]
    fn test_non_integer_scale_rejected() {
        assert_eq!(
            ResizePlan::new(Size::new(3, 2), 4, 4, 80),
            Err(DisplayError::InvalidArgument)
        );
        assert_eq!(
            ResizePlan::new(Size::new(2, 3), 4, 4, 80),
            Err(DisplayError::InvalidArgument)
        );
    }

    #[test]
    fn test_downscale_and_empty_rejected() {
        assert!(ResizePlan::new(Size::new(8, 8), 4, 4, 80).is_err());
        assert!(ResizePlan::new(Size::new(0, 4), 4, 4, 80).is_err());
        assert!(ResizePlan::new(Size::new(2, 2), 4, 4, 0).is_err());
    }

    #[test]
    fn test_identity_scale_is_valid() {
        let plan = ResizePlan::new(Size::new(4, 4), 4, 4, 80).unwrap();
        assert_eq!((plan.x_scale(), plan.y_scale()), (1, 1));
        assert_eq!(plan.write_count(), 4);
    }

    proptest! {
        #[test]
        fn prop_write_count_matches_segments(
            w in 1u16..24,
            h in 1u16..12,
            rx in 1u16..5,
            ry in 1u16..5,
            scratch in 1usize..100,
        ) {
            let plan = ResizePlan::new(Size::new(w.into(), h.into()), w * rx, h * ry, scratch).unwrap();
            let segs: Vec<_> = plan.segments().collect();

            let panel_w = usize::from(w * rx);
            let chunk = scratch.min(panel_w);
            let expected = usize::from(h) * usize::from(ry) * panel_w.div_ceil(chunk);
            prop_assert_eq!(segs.len(), expected);
            prop_assert_eq!(plan.write_count(), expected);

            // Row-major, rows never go backwards.
            for pair in segs.windows(2) {
                prop_assert!(
                    (pair[0].panel_row, pair[0].col) < (pair[1].panel_row, pair[1].col)
                );
            }
            for seg in &segs {
                prop_assert_eq!(seg.source_row, usize::from(seg.panel_row / ry));
                prop_assert!(seg.len <= chunk);
            }
        }
    }
}
