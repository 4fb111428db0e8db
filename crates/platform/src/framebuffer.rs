//! Framebuffer handle
//!
//! A [`Framebuffer`] is a move-only, non-owning view of one RGB565 pixel
//! buffer. The memory belongs to a [`FramebufferPool`](crate::FramebufferPool)
//! (or to whatever slice it was built from); the handle only grants exclusive
//! write access while it is held.
//!
//! Rows are `row_bytes` apart. `row_bytes` may exceed `width * 2` when the
//! buffer carries per-row padding.

use core::marker::PhantomData;
use core::ptr::NonNull;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;

use crate::display::DisplayError;

/// Pixel layout tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelFormat {
    /// 16-bit 5-6-5 RGB, one `u16` per pixel
    #[default]
    Rgb565,
}

impl PixelFormat {
    /// Bytes occupied by one pixel
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
        }
    }
}

/// Non-owning handle to one pixel buffer.
///
/// Not `Clone`: exactly one holder may write the pixels at a time.
/// `Framebuffer::default()` is invalid and every accessor on it fails or
/// does nothing.
#[derive(Debug, Default)]
pub struct Framebuffer<'a> {
    data: Option<NonNull<u16>>,
    size: Size,
    row_bytes: usize,
    format: PixelFormat,
    _buffer: PhantomData<&'a mut [u16]>,
}

// SAFETY: a Framebuffer is the only live handle to its pixel region (the
// constructors require exclusive access for 'a), so moving it to another
// thread or into an interrupt handler cannot create aliased mutable access.
unsafe impl Send for Framebuffer<'_> {}

impl<'a> Framebuffer<'a> {
    /// Build a handle over raw memory.
    ///
    /// Fails with `InvalidArgument` when `data` is null, or when `row_bytes`
    /// is smaller than one packed row or not a whole number of pixels.
    ///
    /// # Safety
    ///
    /// `data` must point to at least [`Framebuffer::required_len`] pixels that
    /// stay valid for `'a`, and no other reference may access that memory
    /// while the returned handle (or anything it is moved into) is alive.
    pub unsafe fn new(
        data: *mut u16,
        size: Size,
        row_bytes: usize,
        format: PixelFormat,
    ) -> Result<Self, DisplayError> {
        let data = NonNull::new(data).ok_or(DisplayError::InvalidArgument)?;
        Self::check_layout(size, row_bytes, format)?;
        Ok(Self {
            data: Some(data),
            size,
            row_bytes,
            format,
            _buffer: PhantomData,
        })
    }

    /// Build a handle over a borrowed slice.
    pub fn from_slice(
        buffer: &'a mut [u16],
        size: Size,
        row_bytes: usize,
    ) -> Result<Self, DisplayError> {
        let needed = Self::required_len(size, row_bytes, PixelFormat::Rgb565)?;
        if buffer.len() < needed {
            return Err(DisplayError::InvalidArgument);
        }
        // SAFETY: the slice is valid for 'a and exclusively borrowed for 'a,
        // and it holds at least `required_len` pixels (checked above).
        unsafe {
            Self::new(
                buffer.as_mut_ptr(),
                size,
                row_bytes,
                PixelFormat::Rgb565,
            )
        }
    }

    /// Pixels a buffer must hold for this geometry.
    pub fn required_len(
        size: Size,
        row_bytes: usize,
        format: PixelFormat,
    ) -> Result<usize, DisplayError> {
        Self::check_layout(size, row_bytes, format)?;
        if size.height == 0 {
            return Ok(0);
        }
        let stride = row_bytes
            .checked_div(format.bytes_per_pixel())
            .ok_or(DisplayError::InvalidArgument)?;
        let width = usize::try_from(size.width).map_err(|_| DisplayError::InvalidArgument)?;
        let rows = usize::try_from(size.height.saturating_sub(1))
            .map_err(|_| DisplayError::InvalidArgument)?;
        stride
            .checked_mul(rows)
            .and_then(|n| n.checked_add(width))
            .ok_or(DisplayError::InvalidArgument)
    }

    fn check_layout(size: Size, row_bytes: usize, format: PixelFormat) -> Result<(), DisplayError> {
        let bpp = format.bytes_per_pixel();
        let packed = usize::try_from(size.width)
            .ok()
            .and_then(|w| w.checked_mul(bpp))
            .ok_or(DisplayError::InvalidArgument)?;
        if row_bytes < packed || row_bytes.checked_rem(bpp) != Some(0) {
            return Err(DisplayError::InvalidArgument);
        }
        Ok(())
    }

    /// Move the handle out, leaving an invalid one behind.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    /// `false` for a default-constructed or moved-from handle.
    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    /// Dimensions in pixels
    pub fn size(&self) -> Size {
        self.size
    }

    /// Bytes between the start of consecutive rows
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Pixel layout
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Pixels between the start of consecutive rows
    pub fn stride(&self) -> usize {
        self.row_bytes
            .checked_div(self.format.bytes_per_pixel())
            .unwrap_or(0)
    }

    /// Whether rows are packed back to back with no padding.
    pub fn is_contiguous(&self) -> bool {
        usize::try_from(self.size.width).is_ok_and(|w| w == self.stride())
    }

    /// Start of the pixel memory; null when invalid.
    ///
    /// Used by DMA transports, which read the memory while the handle is
    /// parked inside the pusher.
    pub fn as_ptr(&self) -> *const u16 {
        self.data
            .map_or(core::ptr::null(), |p| p.as_ptr().cast_const())
    }

    fn width_px(&self) -> usize {
        usize::try_from(self.size.width).unwrap_or(0)
    }

    fn height_px(&self) -> usize {
        usize::try_from(self.size.height).unwrap_or(0)
    }

    /// Pixels of row `y`, or `None` when out of range or invalid.
    pub fn row(&self, y: usize) -> Option<&[u16]> {
        let data = self.data?;
        if y >= self.height_px() {
            return None;
        }
        let offset = self.stride().checked_mul(y)?;
        // SAFETY: y < height, so offset + width <= required_len, which the
        // constructor guaranteed is in bounds; the handle is the only
        // accessor of this memory, and the shared borrow of self prevents
        // concurrent mutation through it.
        Some(unsafe { core::slice::from_raw_parts(data.as_ptr().add(offset), self.width_px()) })
    }

    /// Mutable pixels of row `y`, or `None` when out of range or invalid.
    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u16]> {
        let data = self.data?;
        if y >= self.height_px() {
            return None;
        }
        let offset = self.stride().checked_mul(y)?;
        // SAFETY: same bounds argument as `row`; the exclusive borrow of self
        // makes this the only live reference into the buffer.
        Some(unsafe {
            core::slice::from_raw_parts_mut(data.as_ptr().add(offset), self.width_px())
        })
    }

    /// Color at (`x`, `y`).
    ///
    /// `OutOfRange` outside the buffer, `FailedPrecondition` on an invalid
    /// handle.
    pub fn get_pixel(&self, x: i32, y: i32) -> Result<u16, DisplayError> {
        if !self.is_valid() {
            return Err(DisplayError::FailedPrecondition);
        }
        let (x, y) = self.index(x, y).ok_or(DisplayError::OutOfRange)?;
        self.row(y)
            .and_then(|row| row.get(x))
            .copied()
            .ok_or(DisplayError::OutOfRange)
    }

    /// Store `color` at (`x`, `y`); writes outside the buffer are dropped.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u16) {
        if let Some((x, y)) = self.index(x, y) {
            if let Some(px) = self.row_mut(y).and_then(|row| row.get_mut(x)) {
                *px = color;
            }
        }
    }

    /// Paint every pixel with `color`.
    pub fn fill(&mut self, color: u16) {
        for y in 0..self.height_px() {
            if let Some(row) = self.row_mut(y) {
                row.fill(color);
            }
        }
    }

    /// Copy `src` with its top-left corner at (`x`, `y`), clipped to this
    /// buffer. Pixels equal to `transparent` are skipped.
    pub fn blit(&mut self, src: &Framebuffer<'_>, x: i32, y: i32, transparent: Option<u16>) {
        for sy in 0..src.height_px() {
            let Some(src_row) = src.row(sy) else { continue };
            let Some(dy) = i32::try_from(sy).ok().and_then(|sy| sy.checked_add(y)) else {
                continue;
            };
            for (sx, &color) in src_row.iter().enumerate() {
                if transparent == Some(color) {
                    continue;
                }
                if let Some(dx) = i32::try_from(sx).ok().and_then(|sx| sx.checked_add(x)) {
                    self.set_pixel(dx, dy, color);
                }
            }
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        (x < self.width_px() && y < self.height_px()).then_some((x, y))
    }
}

impl OriginDimensions for Framebuffer<'_> {
    fn size(&self) -> Size {
        self.size
    }
}

impl DrawTarget for Framebuffer<'_> {
    type Color = Rgb565;
    type Error = DisplayError;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        if !self.is_valid() {
            return Err(DisplayError::FailedPrecondition);
        }
        for Pixel(point, color) in pixels {
            self.set_pixel(point.x, point.y, color.into_storage());
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        if !self.is_valid() {
            return Err(DisplayError::FailedPrecondition);
        }
        self.fill(color.into_storage());
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
    use proptest::prelude::*;

    #[test]
    fn test_default_is_invalid() {
        let fb = Framebuffer::default();
        assert!(!fb.is_valid());
        assert!(fb.as_ptr().is_null());
        assert_eq!(fb.get_pixel(0, 0), Err(DisplayError::FailedPrecondition));
    }

    #[test]
    fn test_take_invalidates_source() {
        let mut mem = [0u16; 16];
        let mut a = Framebuffer::from_slice(&mut mem, Size::new(4, 4), 8).unwrap();
        let b = a.take();
        assert!(!a.is_valid(), "moved-from handle must be invalid");
        assert!(b.is_valid());
        assert_eq!(b.size(), Size::new(4, 4));
    }

    #[test]
    fn test_rejects_short_row_bytes() {
        let mut mem = [0u16; 16];
        let err = Framebuffer::from_slice(&mut mem, Size::new(4, 4), 6).unwrap_err();
        assert_eq!(err, DisplayError::InvalidArgument);
        let err = Framebuffer::from_slice(&mut mem, Size::new(4, 2), 9).unwrap_err();
        assert_eq!(err, DisplayError::InvalidArgument, "odd row bytes split a pixel");
    }

    #[test]
    fn test_rejects_short_buffer() {
        let mut mem = [0u16; 15];
        let err = Framebuffer::from_slice(&mut mem, Size::new(4, 4), 8).unwrap_err();
        assert_eq!(err, DisplayError::InvalidArgument);
    }

    #[test]
    fn test_required_len_with_padding() {
        // 3 rows of 4 pixels, stride 6: the last row needs no trailing padding.
        let n = Framebuffer::required_len(Size::new(4, 3), 12, PixelFormat::Rgb565).unwrap();
        assert_eq!(n, 6 * 2 + 4);
    }

    #[test]
    fn test_out_of_range_reads() {
        let mut mem = [0u16; 4];
        let fb = Framebuffer::from_slice(&mut mem, Size::new(2, 2), 4).unwrap();
        assert_eq!(fb.get_pixel(2, 0), Err(DisplayError::OutOfRange));
        assert_eq!(fb.get_pixel(0, 2), Err(DisplayError::OutOfRange));
        assert_eq!(fb.get_pixel(-1, 0), Err(DisplayError::OutOfRange));
    }

    #[test]
    fn test_set_pixel_outside_is_ignored() {
        let mut mem = [0u16; 4];
        let mut fb = Framebuffer::from_slice(&mut mem, Size::new(2, 2), 4).unwrap();
        fb.set_pixel(5, 5, 0xFFFF);
        fb.set_pixel(-1, 0, 0xFFFF);
        drop(fb);
        assert_eq!(mem, [0; 4]);
    }

    #[test]
    fn test_padding_untouched_by_fill() {
        let mut mem = [0xEEEEu16; 6];
        let mut fb = Framebuffer::from_slice(&mut mem, Size::new(2, 2), 6).unwrap();
        assert!(!fb.is_contiguous());
        fb.fill(0x1234);
        drop(fb);
        assert_eq!(mem, [0x1234, 0x1234, 0xEEEE, 0x1234, 0x1234, 0xEEEE]);
    }

    #[test]
    fn test_blit_clips_and_skips_transparent() {
        let mut dst_mem = [0u16; 9];
        let mut src_mem = [0xF800u16, 0xF81F, 0x07E0, 0x001F];
        let mut dst = Framebuffer::from_slice(&mut dst_mem, Size::new(3, 3), 6).unwrap();
        let src = Framebuffer::from_slice(&mut src_mem, Size::new(2, 2), 4).unwrap();

        dst.blit(&src, 2, 2, Some(0xF81F));

        assert_eq!(dst.get_pixel(2, 2).unwrap(), 0xF800);
        // Everything else lies outside the destination or is transparent.
        assert_eq!(dst.get_pixel(1, 1).unwrap(), 0);
        assert_eq!(dst.get_pixel(2, 1).unwrap(), 0);
    }

    #[test]
    fn test_draw_target_renders_rgb565() {
        let mut mem = [0u16; 16];
        let mut fb = Framebuffer::from_slice(&mut mem, Size::new(4, 4), 8).unwrap();
        Rectangle::new(Point::new(1, 1), Size::new(2, 2))
            .into_styled(PrimitiveStyle::with_fill(Rgb565::RED))
            .draw(&mut fb)
            .unwrap();
        assert_eq!(fb.get_pixel(1, 1).unwrap(), 0xF800);
        assert_eq!(fb.get_pixel(2, 2).unwrap(), 0xF800);
        assert_eq!(fb.get_pixel(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_draw_on_invalid_fails() {
        let mut fb = Framebuffer::default();
        assert_eq!(fb.clear(Rgb565::BLUE), Err(DisplayError::FailedPrecondition));
    }

    proptest! {
        #[test]
        fn prop_pixel_round_trip(
            w in 1u32..12, h in 1u32..12, pad in 0usize..3,
            x in -4i32..16, y in -4i32..16, color in any::<u16>(),
        ) {
            let row_bytes = (w as usize + pad) * 2;
            let mut mem = vec![0u16; (w as usize + pad) * h as usize];
            let mut fb = Framebuffer::from_slice(&mut mem, Size::new(w, h), row_bytes).unwrap();
            fb.set_pixel(x, y, color);
            let inside = x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h;
            if inside {
                prop_assert_eq!(fb.get_pixel(x, y), Ok(color));
            } else {
                prop_assert_eq!(fb.get_pixel(x, y), Err(DisplayError::OutOfRange));
            }
        }
    }
}
