//! Panel configuration
//!
//! Static description of one panel: geometry, orientation, controller RAM
//! offsets, wire settings and the init script. Board code picks a preset
//! and adjusts fields as needed.

use embedded_graphics::geometry::Size;
use platform::SpiConfig;

use crate::controllers;
use crate::dcs::madctl;
use crate::script::Step;

/// Scan-direction flags sent with MADCTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(clippy::struct_excessive_bools)] // one flag per MADCTL bit
pub struct Orientation {
    /// MY: mirror vertically
    pub mirror_y: bool,
    /// MX: mirror horizontally
    pub mirror_x: bool,
    /// MV: exchange rows and columns
    pub swap_xy: bool,
    /// ML: refresh bottom to top
    pub refresh_bottom_up: bool,
    /// MH: refresh right to left
    pub refresh_right_left: bool,
}

impl Orientation {
    /// MADCTL bits for these flags (BGR excluded).
    pub const fn madctl_bits(self) -> u8 {
        let mut bits = 0;
        if self.mirror_y {
            bits |= madctl::ROW_ORDER;
        }
        if self.mirror_x {
            bits |= madctl::COL_ORDER;
        }
        if self.swap_xy {
            bits |= madctl::SWAP_XY;
        }
        if self.refresh_bottom_up {
            bits |= madctl::SCAN_ORDER;
        }
        if self.refresh_right_left {
            bits |= madctl::HORIZ_ORDER;
        }
        bits
    }
}

/// Static panel description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelConfig {
    /// Visible width in pixels
    pub width: u16,
    /// Visible height in pixels
    pub height: u16,
    /// First controller RAM column of the visible area
    pub col_offset: u16,
    /// First controller RAM row of the visible area
    pub row_offset: u16,
    /// Controller addresses columns along the panel height
    pub swap_row_col: bool,
    /// Scan direction
    pub orientation: Orientation,
    /// Panel subpixels are blue-green-red
    pub bgr: bool,
    /// Wire settings for the SPI bus
    pub spi: SpiConfig,
    /// Controller init script
    pub script: &'static [Step],
}

impl PanelConfig {
    /// Bare configuration: no offsets, default orientation, RGB order.
    pub const fn new(width: u16, height: u16, script: &'static [Step]) -> Self {
        Self {
            width,
            height,
            col_offset: 0,
            row_offset: 0,
            swap_row_col: false,
            orientation: Orientation {
                mirror_y: false,
                mirror_x: false,
                swap_xy: false,
                refresh_bottom_up: false,
                refresh_right_left: false,
            },
            bgr: false,
            spi: SpiConfig::panel_default(),
            script,
        }
    }

    /// ILI9341, 320×240 landscape.
    pub const fn ili9341() -> Self {
        let mut config = Self::new(320, 240, controllers::ILI9341);
        config.orientation = Orientation {
            mirror_y: true,
            mirror_x: true,
            swap_xy: true,
            refresh_bottom_up: false,
            refresh_right_left: false,
        };
        config.bgr = true;
        config
    }

    /// ST7789, 320×240 landscape.
    pub const fn st7789_320x240() -> Self {
        let mut config = Self::new(320, 240, controllers::ST7789);
        config.orientation = Orientation {
            mirror_y: false,
            mirror_x: true,
            swap_xy: true,
            refresh_bottom_up: true,
            refresh_right_left: false,
        };
        config
    }

    /// ST7789, 240×240 square.
    pub const fn st7789_240x240() -> Self {
        let mut config = Self::new(240, 240, controllers::ST7789);
        config.orientation = Orientation {
            mirror_y: false,
            mirror_x: false,
            swap_xy: false,
            refresh_bottom_up: false,
            refresh_right_left: true,
        };
        config
    }

    /// ST7735, 160×128 landscape. The visible area starts at RAM column 1,
    /// row 2.
    pub const fn st7735_160x128() -> Self {
        let mut config = Self::new(160, 128, controllers::ST7735);
        config.col_offset = 1;
        config.row_offset = 2;
        config.orientation = Orientation {
            mirror_y: false,
            mirror_x: true,
            swap_xy: true,
            refresh_bottom_up: true,
            refresh_right_left: false,
        };
        config
    }

    /// RM67162 AMOLED, 536×240 landscape, driven over MIPI-DSI.
    pub const fn rm67162() -> Self {
        let mut config = Self::new(536, 240, controllers::RM67162);
        config.orientation = Orientation {
            mirror_y: false,
            mirror_x: true,
            swap_xy: true,
            refresh_bottom_up: false,
            refresh_right_left: false,
        };
        config
    }

    /// MADCTL parameter byte.
    pub const fn madctl(&self) -> u8 {
        let bits = self.orientation.madctl_bits();
        if self.bgr {
            bits | madctl::BGR
        } else {
            bits
        }
    }

    /// Frame width as addressed by the column window.
    ///
    /// With `swap_row_col` the controller's columns run along the panel
    /// height.
    pub const fn columns(&self) -> u16 {
        if self.swap_row_col {
            self.height
        } else {
            self.width
        }
    }

    /// Frame height as addressed by the row window.
    pub const fn rows(&self) -> u16 {
        if self.swap_row_col {
            self.width
        } else {
            self.height
        }
    }

    /// Size a full frame must have.
    pub fn frame_size(&self) -> Size {
        Size::new(u32::from(self.columns()), u32::from(self.rows()))
    }

    /// Pixels on the panel.
    pub fn pixel_count(&self) -> usize {
        usize::from(self.width).saturating_mul(usize::from(self.height))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_madctl_values() {
        assert_eq!(PanelConfig::ili9341().madctl(), 0xE8, "MY|MX|MV|BGR");
        assert_eq!(PanelConfig::st7789_320x240().madctl(), 0x70, "MX|MV|ML");
        assert_eq!(PanelConfig::st7789_240x240().madctl(), 0x04, "MH");
        assert_eq!(PanelConfig::st7735_160x128().madctl(), 0x70, "MX|MV|ML");
    }

    #[test]
    fn test_preset_geometry() {
        let ili = PanelConfig::ili9341();
        assert_eq!((ili.width, ili.height), (320, 240));
        assert_eq!(ili.pixel_count(), 76_800);

        let st7735 = PanelConfig::st7735_160x128();
        assert_eq!((st7735.col_offset, st7735.row_offset), (1, 2));

        let amoled = PanelConfig::rm67162();
        assert_eq!((amoled.width, amoled.height), (536, 240));
    }

    #[test]
    fn test_new_is_plain() {
        let cfg = PanelConfig::new(4, 2, &[]);
        assert_eq!(cfg.madctl(), 0);
        assert!(!cfg.swap_row_col);
        assert_eq!(cfg.spi, SpiConfig::panel_default());
        assert_eq!((cfg.columns(), cfg.rows()), (4, 2));
    }

    #[test]
    fn test_swap_row_col_transposes_frame() {
        let mut cfg = PanelConfig::new(4, 2, &[]);
        cfg.swap_row_col = true;
        assert_eq!((cfg.columns(), cfg.rows()), (2, 4));
        assert_eq!(cfg.frame_size(), Size::new(2, 4));
        assert_eq!(cfg.pixel_count(), 8);
    }
}
