//! MIPI DCS command set
//!
//! The subset of the Display Command Set shared by ILI9341, ST7789, ST7735
//! and RM67162 controllers. Vendor extension registers (power, gamma, porch
//! control) live next to the scripts that use them in
//! [`controllers`](crate::controllers).

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

/// DCS command codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// NOP.
    Nop = 0x00,
    /// Software reset: 0 data bytes; wait ≥5 ms (≥120 ms before sleep-out).
    SoftReset = 0x01,
    /// Enter sleep: 0 data bytes.
    SleepIn = 0x10,
    /// Sleep out: 0 data bytes; wait ≥5 ms before the next command.
    SleepOut = 0x11,
    /// Normal display mode on: 0 data bytes.
    NormalModeOn = 0x13,
    /// Display inversion off: 0 data bytes.
    InversionOff = 0x20,
    /// Display inversion on: 0 data bytes.
    InversionOn = 0x21,
    /// Gamma curve select: 1 data byte.
    GammaSet = 0x26,
    /// Display off: 0 data bytes.
    DisplayOff = 0x28,
    /// Display on: 0 data bytes.
    DisplayOn = 0x29,
    /// Column address set: 4 data bytes `[x0 hi, x0 lo, x1 hi, x1 lo]`.
    ColumnAddressSet = 0x2A,
    /// Row (page) address set: 4 data bytes `[y0 hi, y0 lo, y1 hi, y1 lo]`.
    RowAddressSet = 0x2B,
    /// Memory write: pixel data follows with D/C high.
    MemoryWrite = 0x2C,
    /// Tearing effect line on: 0 or 1 data byte (0x00 = V-blank only).
    TearingEffectOn = 0x35,
    /// Memory data access control: 1 data byte (see `madctl`).
    MemoryAccessControl = 0x36,
    /// Interface pixel format: 1 data byte (see `colmod`).
    PixelFormatSet = 0x3A,
    /// Write display brightness: 1 data byte.
    WriteBrightness = 0x51,
}

impl Command {
    /// Opcode byte sent with D/C low.
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// MADCTL bits
// ---------------------------------------------------------------------------

/// MADCTL (0x36) bit flags.
pub mod madctl {
    /// MY: row address order (mirror vertically).
    pub const ROW_ORDER: u8 = 0b1000_0000;
    /// MX: column address order (mirror horizontally).
    pub const COL_ORDER: u8 = 0b0100_0000;
    /// MV: row/column exchange.
    pub const SWAP_XY: u8 = 0b0010_0000;
    /// ML: vertical refresh order.
    pub const SCAN_ORDER: u8 = 0b0001_0000;
    /// BGR: blue/green/red subpixel order.
    pub const BGR: u8 = 0b0000_1000;
    /// MH: horizontal refresh order.
    pub const HORIZ_ORDER: u8 = 0b0000_0100;
}

// ---------------------------------------------------------------------------
// COLMOD values
// ---------------------------------------------------------------------------

/// COLMOD (0x3A) interface pixel formats.
pub mod colmod {
    /// 16 bits per pixel, RGB565 (ILI9341 / RM67162 encoding).
    pub const RGB565: u8 = 0x55;
    /// 16 bits per pixel, control-interface field only (ST77xx encoding).
    pub const RGB565_CONTROL: u8 = 0x05;
}

// ---------------------------------------------------------------------------
// Address window encoding
// ---------------------------------------------------------------------------

/// Data bytes for CASET / RASET: inclusive range, big-endian.
pub const fn window_bytes(start: u16, end: u16) -> [u8; 4] {
    let [s_hi, s_lo] = start.to_be_bytes();
    let [e_hi, e_lo] = end.to_be_bytes();
    [s_hi, s_lo, e_hi, e_lo]
}

/// Inclusive range `[start, start + len - 1]`, or `None` on overflow or
/// an empty run.
pub fn span(start: u16, len: usize) -> Option<(u16, u16)> {
    let len = u16::try_from(len).ok()?;
    let end = start.checked_add(len.checked_sub(1)?)?;
    Some((start, end))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_window_addressing_opcodes() {
        assert_eq!(Command::ColumnAddressSet.opcode(), 0x2A);
        assert_eq!(Command::RowAddressSet.opcode(), 0x2B);
        assert_eq!(Command::MemoryWrite.opcode(), 0x2C);
        assert_eq!(Command::MemoryAccessControl.opcode(), 0x36);
        assert_eq!(Command::PixelFormatSet.opcode(), 0x3A);
    }

    #[test]
    fn test_window_bytes_are_big_endian() {
        assert_eq!(window_bytes(5, 7), [0x00, 0x05, 0x00, 0x07]);
        assert_eq!(window_bytes(0, 319), [0x00, 0x00, 0x01, 0x3F]);
        assert_eq!(window_bytes(0x1234, 0xABCD), [0x12, 0x34, 0xAB, 0xCD]);
    }

    #[test]
    fn test_span() {
        assert_eq!(span(5, 3), Some((5, 7)));
        assert_eq!(span(10, 1), Some((10, 10)));
        assert_eq!(span(0, 0), None, "empty run has no window");
        assert_eq!(span(u16::MAX, 2), None, "overflow");
    }

    #[test]
    fn test_madctl_bits_are_distinct() {
        let bits = [
            madctl::ROW_ORDER,
            madctl::COL_ORDER,
            madctl::SWAP_XY,
            madctl::SCAN_ORDER,
            madctl::BGR,
            madctl::HORIZ_ORDER,
        ];
        let combined = bits.iter().fold(0u8, |acc, b| {
            assert_eq!(acc & b, 0);
            acc | b
        });
        assert_eq!(combined, 0b1111_1100);
    }
}
