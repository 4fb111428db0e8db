//! Init scripts for supported panel controllers
//!
//! Tables keep each vendor's bring-up order, so the layout differs per part.
//! Every table resets the controller (hardware or software), leaves sleep,
//! selects 16-bit pixels, programs memory-access control, switches the
//! display on and sets the full window. ILI9341, for one, has no software
//! reset and programs power, VCOM, MADCTL and gamma before sleep-out.
//! Vendor register opcodes are named here because no other module uses them.

use crate::dcs::{colmod, Command};
use crate::script::Step;

// ---------------------------------------------------------------------------
// Vendor registers
// ---------------------------------------------------------------------------

/// ILI9341 extended registers.
pub mod ili9341 {
    /// Undocumented power-on sequence register.
    pub const UNDOC_EF: u8 = 0xEF;
    /// Power control B.
    pub const PWCTRB: u8 = 0xCF;
    /// Power-on sequence control.
    pub const PWONSEQ: u8 = 0xED;
    /// Driver timing control A.
    pub const DTCTRA: u8 = 0xE8;
    /// Power control A.
    pub const PWCTRA: u8 = 0xCB;
    /// Pump ratio control.
    pub const PUMPRC: u8 = 0xF7;
    /// Driver timing control B.
    pub const DTCTRB: u8 = 0xEA;
    /// Power control 1.
    pub const PWCTR1: u8 = 0xC0;
    /// Power control 2.
    pub const PWCTR2: u8 = 0xC1;
    /// VCOM control 1.
    pub const VMCTR1: u8 = 0xC5;
    /// VCOM control 2.
    pub const VMCTR2: u8 = 0xC7;
    /// Frame rate control (normal mode).
    pub const FRMCTR1: u8 = 0xB1;
    /// Display function control.
    pub const DFUNCTR: u8 = 0xB6;
    /// 3-gamma function disable.
    pub const GAMMA3: u8 = 0xF2;
    /// Positive gamma correction.
    pub const GMCTRP1: u8 = 0xE0;
    /// Negative gamma correction.
    pub const GMCTRN1: u8 = 0xE1;

    /// FRMCTR1 divider for 61 Hz.
    pub const FRAME_RATE_61HZ: u8 = 0x1F;
}

/// Sitronix ST77xx extended registers.
pub mod st77xx {
    /// Frame rate control (normal mode).
    pub const FRMCTR1: u8 = 0xB1;
    /// Porch control.
    pub const PORCTRL: u8 = 0xB2;
    /// Display inversion control.
    pub const INVCTR: u8 = 0xB4;
    /// Display function set 5.
    pub const DISSET5: u8 = 0xB6;
    /// LCM control (ST7789) / power control 1 (ST7735).
    pub const LCMCTRL: u8 = 0xC0;
    /// Power control 2.
    pub const PWCTR2: u8 = 0xC1;
    /// VDV and VRH command enable (ST7789) / power control 3 (ST7735).
    pub const VDVVRHEN: u8 = 0xC2;
    /// VRH set.
    pub const VRHS: u8 = 0xC3;
    /// VDV set.
    pub const VDVS: u8 = 0xC4;
    /// VCOM control 1.
    pub const VMCTR1: u8 = 0xC5;
    /// Frame rate control in normal mode.
    pub const FRCTRL2: u8 = 0xC6;
    /// Power control 1 (ST7789).
    pub const PWCTRL1: u8 = 0xD0;
    /// Positive gamma correction.
    pub const GMCTRP1: u8 = 0xE0;
    /// Negative gamma correction.
    pub const GMCTRN1: u8 = 0xE1;
    /// Power control 6 (ST7735).
    pub const PWCTR6: u8 = 0xFC;
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// ILI9341 (320×240, 18-bit panel driven at 16 bpp).
pub static ILI9341: &[Step] = &[
    Step::HardwareReset,
    Step::reg(ili9341::UNDOC_EF, &[0x03, 0x80, 0x02]),
    Step::reg(ili9341::PWCTRB, &[0x00, 0xC1, 0x30]),
    Step::reg(ili9341::PWONSEQ, &[0x64, 0x03, 0x12, 0x81]),
    Step::reg(ili9341::DTCTRA, &[0x85, 0x00, 0x78]),
    Step::reg(ili9341::PWCTRA, &[0x39, 0x2C, 0x00, 0x34, 0x02]),
    Step::reg(ili9341::PUMPRC, &[0x20]),
    Step::reg(ili9341::DTCTRB, &[0x00, 0x00]),
    // GVDD 4.6 V
    Step::reg(ili9341::PWCTR1, &[0x23]),
    Step::reg(ili9341::PWCTR2, &[0x10]),
    Step::reg(ili9341::VMCTR1, &[0x3E, 0x28]),
    Step::reg(ili9341::VMCTR2, &[0x86]),
    Step::MemoryAccess,
    Step::cmd(Command::PixelFormatSet, &[colmod::RGB565]),
    Step::reg(ili9341::FRMCTR1, &[0x00, ili9341::FRAME_RATE_61HZ]),
    Step::reg(ili9341::DFUNCTR, &[0x08, 0x82, 0x27]),
    Step::reg(ili9341::GAMMA3, &[0x00]),
    Step::cmd(Command::GammaSet, &[0x01]),
    Step::reg(
        ili9341::GMCTRP1,
        &[
            0x0F, 0x31, 0x2B, 0x0C, 0x0E, 0x08, 0x4E, 0xF1, 0x37, 0x07, 0x10, 0x03, 0x0E, 0x09,
            0x00,
        ],
    ),
    Step::reg(
        ili9341::GMCTRN1,
        &[
            0x00, 0x0E, 0x14, 0x03, 0x11, 0x07, 0x31, 0xC1, 0x48, 0x08, 0x0F, 0x0C, 0x31, 0x36,
            0x0F,
        ],
    ),
    Step::bare(Command::SleepOut),
    Step::Delay(100),
    Step::bare(Command::DisplayOn),
    Step::Delay(100),
    Step::bare(Command::NormalModeOn),
    Step::FullWindow,
    Step::Delay(10),
    Step::MemoryWrite,
    Step::Delay(100),
];

/// ST7789 (240×240 or 320×240).
pub static ST7789: &[Step] = &[
    Step::HardwareReset,
    Step::bare(Command::SoftReset),
    Step::Delay(150),
    Step::bare(Command::TearingEffectOn),
    Step::cmd(Command::PixelFormatSet, &[colmod::RGB565_CONTROL]),
    Step::reg(st77xx::PORCTRL, &[0x0C, 0x0C, 0x00, 0x33, 0x33]),
    Step::reg(st77xx::LCMCTRL, &[0x2C]),
    Step::reg(st77xx::VDVVRHEN, &[0x01]),
    Step::reg(st77xx::VRHS, &[0x12]),
    Step::reg(st77xx::VDVS, &[0x20]),
    Step::reg(st77xx::PWCTRL1, &[0xA4, 0xA1]),
    Step::reg(st77xx::FRCTRL2, &[0x0F]),
    Step::bare(Command::InversionOn),
    Step::bare(Command::SleepOut),
    Step::bare(Command::DisplayOn),
    Step::FullWindow,
    Step::MemoryAccess,
    Step::Delay(50),
];

/// ST7735 (160×128). Visible area is offset inside controller RAM.
pub static ST7735: &[Step] = &[
    Step::HardwareReset,
    Step::bare(Command::SoftReset),
    Step::Delay(150),
    Step::bare(Command::SleepOut),
    Step::Delay(500),
    Step::reg(st77xx::FRMCTR1, &[0x00, 0x06, 0x03]),
    Step::Delay(10),
    Step::reg(st77xx::DISSET5, &[0x15, 0x02]),
    Step::reg(st77xx::INVCTR, &[0x07]),
    Step::bare(Command::TearingEffectOn),
    Step::cmd(Command::PixelFormatSet, &[colmod::RGB565_CONTROL]),
    Step::reg(st77xx::PORCTRL, &[0x0C, 0x0C, 0x00, 0x33, 0x33]),
    // GVDD 4.7 V, 1.0 uA
    Step::reg(st77xx::LCMCTRL, &[0x02, 0x70]),
    Step::Delay(10),
    Step::reg(st77xx::PWCTR2, &[0x05]),
    Step::reg(st77xx::VDVVRHEN, &[0x01, 0x02]),
    Step::reg(st77xx::VMCTR1, &[0x3C, 0x38]),
    Step::Delay(10),
    Step::reg(st77xx::PWCTR6, &[0x11, 0x15]),
    Step::reg(st77xx::VRHS, &[0x12]),
    Step::reg(st77xx::VDVS, &[0x20]),
    Step::reg(st77xx::PWCTRL1, &[0xA4, 0xA1]),
    Step::reg(st77xx::FRCTRL2, &[0x0F]),
    Step::bare(Command::InversionOff),
    Step::reg(
        st77xx::GMCTRP1,
        &[
            0x09, 0x16, 0x09, 0x20, 0x21, 0x1B, 0x13, 0x19, 0x17, 0x15, 0x1E, 0x2B, 0x04, 0x05,
            0x02, 0x0E,
        ],
    ),
    Step::reg(
        st77xx::GMCTRN1,
        &[
            0x0B, 0x14, 0x08, 0x1E, 0x22, 0x1D, 0x18, 0x1E, 0x1B, 0x1A, 0x24, 0x2B, 0x06, 0x06,
            0x02, 0x0F,
        ],
    ),
    Step::Delay(10),
    Step::FullWindow,
    Step::MemoryAccess,
    Step::bare(Command::NormalModeOn),
    Step::Delay(10),
    Step::bare(Command::DisplayOn),
    Step::Delay(500),
];

/// RM67162 AMOLED over MIPI-DSI; plain DCS only.
pub static RM67162: &[Step] = &[
    Step::bare(Command::SoftReset),
    Step::Delay(20),
    Step::bare(Command::SleepOut),
    Step::Delay(120),
    Step::cmd(Command::PixelFormatSet, &[colmod::RGB565]),
    Step::MemoryAccess,
    Step::cmd(Command::TearingEffectOn, &[0x00]),
    Step::cmd(Command::WriteBrightness, &[0xFF]),
    Step::bare(Command::DisplayOn),
    Step::Delay(20),
    Step::FullWindow,
    Step::MemoryWrite,
];

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
    use platform::mocks::{BusEvent, RecordingBus};

    use crate::config::PanelConfig;
    use crate::driver::NoResetPin;
    use crate::script::{self, MAX_COMMAND_DATA};

    async fn run(config: &PanelConfig) -> RecordingBus {
        let mut bus = RecordingBus::new();
        script::run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, config)
            .await
            .unwrap();
        bus
    }

    #[test]
    fn test_payloads_fit_command_limit() {
        for table in [ILI9341, ST7789, ST7735, RM67162] {
            for step in table {
                if let Step::Command { data, .. } = step {
                    assert!(data.len() <= MAX_COMMAND_DATA);
                }
            }
        }
    }

    #[test]
    fn test_every_table_has_core_bring_up_steps() {
        for table in [ILI9341, ST7789, ST7735, RM67162] {
            assert!(
                table.contains(&Step::HardwareReset)
                    || table.contains(&Step::bare(Command::SoftReset))
            );
            assert!(table.contains(&Step::bare(Command::SleepOut)));
            assert!(table.contains(&Step::bare(Command::DisplayOn)));
            assert!(table.contains(&Step::MemoryAccess));
            assert!(table.contains(&Step::FullWindow));
            assert!(table.iter().any(|step| matches!(
                step,
                Step::Command { opcode, .. } if *opcode == Command::PixelFormatSet.opcode()
            )));
        }
    }

    #[tokio::test]
    async fn test_ili9341_sequence() {
        let bus = run(&PanelConfig::ili9341()).await;
        let ops = bus.opcodes();

        assert_eq!(ops.first(), Some(&0xEF));
        assert_eq!(
            &ops[ops.len() - 6..],
            &[0x11, 0x29, 0x13, 0x2A, 0x2B, 0x2C],
            "sleep-out, display-on, normal mode, window, memory write"
        );
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x36, vec![0xE8])));
        assert!(bus.events.contains(&BusEvent::Command(0x3A, vec![0x55])));
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x2A, vec![0x00, 0x00, 0x01, 0x3F])));
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x2B, vec![0x00, 0x00, 0x00, 0xEF])));
    }

    #[tokio::test]
    async fn test_st7789_sequence() {
        let bus = run(&PanelConfig::st7789_320x240()).await;
        assert_eq!(
            bus.opcodes(),
            vec![
                0x01, 0x35, 0x3A, 0xB2, 0xC0, 0xC2, 0xC3, 0xC4, 0xD0, 0xC6, 0x21, 0x11, 0x29,
                0x2A, 0x2B, 0x36
            ]
        );
        assert_eq!(bus.events.last(), Some(&BusEvent::Command(0x36, vec![0x70])));
    }

    #[tokio::test]
    async fn test_st7735_window_includes_ram_offsets() {
        let bus = run(&PanelConfig::st7735_160x128()).await;
        // 160 columns from RAM column 1, 128 rows from RAM row 2.
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x2A, vec![0x00, 0x01, 0x00, 0xA0])));
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x2B, vec![0x00, 0x02, 0x00, 0x81])));
        assert_eq!(bus.opcodes().last(), Some(&0x29));
    }

    #[tokio::test]
    async fn test_rm67162_ends_in_memory_write() {
        let bus = run(&PanelConfig::rm67162()).await;
        let ops = bus.opcodes();
        assert_eq!(ops.first(), Some(&0x01));
        assert_eq!(&ops[ops.len() - 3..], &[0x2A, 0x2B, 0x2C]);
        assert!(bus
            .events
            .contains(&BusEvent::Command(0x2A, vec![0x00, 0x00, 0x02, 0x17])));
    }
}
