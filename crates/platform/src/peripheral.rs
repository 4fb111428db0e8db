//! Peripheral configuration
//!
//! Wire settings for the SPI link to a panel controller. The HAL owns the
//! actual bus; these types describe how it must be configured.

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// SPI mode (CPOL, CPHA)
    pub mode: SpiMode,
    /// Bit order
    pub bit_order: BitOrder,
}

impl SpiConfig {
    /// Settings shared by the ILI9341 / ST7789 / ST7735 family.
    ///
    /// Clock active-high with data on the falling edge (CPOL 1, CPHA 1),
    /// MSB first. Commands go out as 8-bit words, pixels as 16-bit words
    /// split big-endian, which is the same byte stream.
    pub const fn panel_default() -> Self {
        Self {
            frequency: 62_500_000,
            mode: SpiMode::from_clock(ClockPolarity::ActiveHigh, ClockPhase::FallingEdge),
            bit_order: BitOrder::MsbFirst,
        }
    }

    /// Same settings at another clock rate.
    pub const fn with_frequency(self, frequency: u32) -> Self {
        Self { frequency, ..self }
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self::panel_default()
    }
}

/// Clock polarity as panel datasheets state it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockPolarity {
    /// Clock idles low
    ActiveLow,
    /// Clock idles high
    ActiveHigh,
}

/// Clock edge data is sampled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockPhase {
    /// First edge
    RisingEdge,
    /// Second edge
    FallingEdge,
}

/// SPI modes (CPOL, CPHA)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    /// Map datasheet polarity/phase to a numbered mode.
    pub const fn from_clock(polarity: ClockPolarity, phase: ClockPhase) -> Self {
        match (polarity, phase) {
            (ClockPolarity::ActiveLow, ClockPhase::RisingEdge) => Self::Mode0,
            (ClockPolarity::ActiveLow, ClockPhase::FallingEdge) => Self::Mode1,
            (ClockPolarity::ActiveHigh, ClockPhase::RisingEdge) => Self::Mode2,
            (ClockPolarity::ActiveHigh, ClockPhase::FallingEdge) => Self::Mode3,
        }
    }
}

impl From<SpiMode> for embedded_hal::spi::Mode {
    fn from(mode: SpiMode) -> Self {
        match mode {
            SpiMode::Mode0 => embedded_hal::spi::MODE_0,
            SpiMode::Mode1 => embedded_hal::spi::MODE_1,
            SpiMode::Mode2 => embedded_hal::spi::MODE_2,
            SpiMode::Mode3 => embedded_hal::spi::MODE_3,
        }
    }
}

/// Bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    /// Most significant bit first
    MsbFirst,
    /// Least significant bit first
    LsbFirst,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_default_is_mode3_msb_first() {
        let cfg = SpiConfig::panel_default();
        assert_eq!(cfg.mode, SpiMode::Mode3);
        assert_eq!(cfg.bit_order, BitOrder::MsbFirst);
        assert_eq!(
            embedded_hal::spi::Mode::from(cfg.mode),
            embedded_hal::spi::MODE_3
        );
    }

    #[test]
    fn test_with_frequency_keeps_mode() {
        let cfg = SpiConfig::default().with_frequency(24_000_000);
        assert_eq!(cfg.frequency, 24_000_000);
        assert_eq!(cfg.mode, SpiMode::Mode3);
    }
}
