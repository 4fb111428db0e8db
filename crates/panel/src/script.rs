//! Controller init scripts
//!
//! An init script is a flat `&'static [Step]` table. Most steps are literal
//! commands and delays; three are resolved against the panel geometry when
//! the script runs, so one table serves every orientation of a controller.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use platform::{CommandBus, DisplayError};

use crate::config::PanelConfig;
use crate::dcs::{self, Command};

/// Longest data payload a script command may carry.
pub const MAX_COMMAND_DATA: usize = 16;

/// Reset pulse: RST held low this long, then released.
pub const RESET_PULSE_MS: u32 = 100;

/// Settle time after releasing RST.
pub const RESET_SETTLE_MS: u32 = 100;

/// One init-script entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Opcode with D/C low, then `data` with D/C high.
    Command {
        /// Command byte
        opcode: u8,
        /// Parameter bytes (at most [`MAX_COMMAND_DATA`])
        data: &'static [u8],
    },
    /// Wait this many milliseconds.
    Delay(u32),
    /// Pulse the reset line; skipped when the driver has no reset pin.
    HardwareReset,
    /// MADCTL with the configured orientation.
    MemoryAccess,
    /// CASET / RASET covering the whole panel.
    FullWindow,
    /// Enter memory-write mode; D/C stays high afterwards.
    MemoryWrite,
}

impl Step {
    /// Command step with parameters.
    pub const fn cmd(command: Command, data: &'static [u8]) -> Self {
        Self::Command {
            opcode: command.opcode(),
            data,
        }
    }

    /// Command step without parameters.
    pub const fn bare(command: Command) -> Self {
        Self::cmd(command, &[])
    }

    /// Vendor register write.
    pub const fn reg(opcode: u8, data: &'static [u8]) -> Self {
        Self::Command { opcode, data }
    }
}

/// Pulse RST: low, wait, high, wait.
pub async fn pulse_reset<RST, DELAY>(rst: &mut RST, delay: &mut DELAY) -> Result<(), DisplayError>
where
    RST: OutputPin,
    DELAY: DelayNs,
{
    rst.set_low().map_err(|_| DisplayError::Gpio)?;
    delay.delay_ms(RESET_PULSE_MS).await;
    rst.set_high().map_err(|_| DisplayError::Gpio)?;
    delay.delay_ms(RESET_SETTLE_MS).await;
    Ok(())
}

/// Send CASET / RASET for the whole panel.
///
/// With `swap_row_col` the column window takes the height range and the row
/// window the width range. Controller RAM offsets are added to both.
pub async fn set_full_window<B: CommandBus>(
    bus: &mut B,
    config: &PanelConfig,
) -> Result<(), DisplayError> {
    let (cols, rows) = (config.columns(), config.rows());
    let (x0, x1) = dcs::span(config.col_offset, usize::from(cols))
        .ok_or(DisplayError::InvalidArgument)?;
    let (y0, y1) = dcs::span(config.row_offset, usize::from(rows))
        .ok_or(DisplayError::InvalidArgument)?;
    bus.command(Command::ColumnAddressSet.opcode(), &dcs::window_bytes(x0, x1))
        .await?;
    bus.command(Command::RowAddressSet.opcode(), &dcs::window_bytes(y0, y1))
        .await
}

/// Execute `config.script` step by step.
///
/// Stops at the first failing step. `rst` is `None` when the panel has no
/// reset line; `HardwareReset` steps are then skipped.
pub async fn run<B, RST, DELAY>(
    bus: &mut B,
    rst: Option<&mut RST>,
    delay: &mut DELAY,
    config: &PanelConfig,
) -> Result<(), DisplayError>
where
    B: CommandBus,
    RST: OutputPin,
    DELAY: DelayNs,
{
    let mut rst = rst;
    for step in config.script {
        match *step {
            Step::Command { opcode, data } => {
                if data.len() > MAX_COMMAND_DATA {
                    return Err(DisplayError::InvalidArgument);
                }
                bus.command(opcode, data).await?;
            }
            Step::Delay(ms) => delay.delay_ms(ms).await,
            Step::HardwareReset => {
                if let Some(pin) = rst.as_deref_mut() {
                    pulse_reset(pin, delay).await?;
                }
            }
            Step::MemoryAccess => {
                bus.command(Command::MemoryAccessControl.opcode(), &[config.madctl()])
                    .await?;
            }
            Step::FullWindow => set_full_window(bus, config).await?,
            Step::MemoryWrite => bus.command(Command::MemoryWrite.opcode(), &[]).await?,
        }
    }
    #[cfg(feature = "defmt")]
    defmt::debug!(
        "Panel script done: {} steps, {}x{}",
        config.script.len(),
        config.width,
        config.height
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use platform::mocks::{BusEvent, RecordingBus};

    use crate::config::Orientation;
    use crate::driver::NoResetPin;

    const TOO_LONG: [u8; 17] = [0; 17];

    fn config(script: &'static [Step]) -> PanelConfig {
        PanelConfig::new(4, 2, script)
    }

    #[tokio::test]
    async fn test_geometry_steps_resolve_against_config() {
        static SCRIPT: [Step; 3] = [Step::MemoryAccess, Step::FullWindow, Step::MemoryWrite];
        let mut cfg = config(&SCRIPT);
        cfg.orientation = Orientation {
            mirror_x: true,
            ..Orientation::default()
        };
        cfg.bgr = true;

        let mut bus = RecordingBus::new();
        run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg)
            .await
            .unwrap();

        assert_eq!(
            bus.events,
            vec![
                BusEvent::Command(0x36, vec![0x48]),
                BusEvent::Command(0x2A, vec![0, 0, 0, 3]),
                BusEvent::Command(0x2B, vec![0, 0, 0, 1]),
                BusEvent::Command(0x2C, vec![]),
            ]
        );
    }

    #[tokio::test]
    async fn test_swap_row_col_swaps_window_ranges() {
        static SCRIPT: [Step; 1] = [Step::FullWindow];
        let mut cfg = config(&SCRIPT);
        cfg.swap_row_col = true;

        let mut bus = RecordingBus::new();
        run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg)
            .await
            .unwrap();

        assert_eq!(
            bus.events,
            vec![
                BusEvent::Command(0x2A, vec![0, 0, 0, 1]),
                BusEvent::Command(0x2B, vec![0, 0, 0, 3]),
            ]
        );
    }

    #[tokio::test]
    async fn test_window_offsets_shift_ranges() {
        static SCRIPT: [Step; 1] = [Step::FullWindow];
        let mut cfg = config(&SCRIPT);
        cfg.col_offset = 1;
        cfg.row_offset = 2;

        let mut bus = RecordingBus::new();
        run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg)
            .await
            .unwrap();

        assert_eq!(
            bus.events,
            vec![
                BusEvent::Command(0x2A, vec![0, 1, 0, 4]),
                BusEvent::Command(0x2B, vec![0, 2, 0, 3]),
            ]
        );
    }

    #[tokio::test]
    async fn test_hardware_reset_pulses_low_then_high() {
        static SCRIPT: [Step; 2] = [Step::HardwareReset, Step::bare(Command::SoftReset)];
        let cfg = config(&SCRIPT);
        let mut rst = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);

        let mut bus = RecordingBus::new();
        run(&mut bus, Some(&mut rst), &mut NoopDelay, &cfg)
            .await
            .unwrap();

        assert_eq!(bus.opcodes(), vec![0x01]);
        rst.done();
    }

    #[tokio::test]
    async fn test_hardware_reset_skipped_without_pin() {
        static SCRIPT: [Step; 2] = [Step::HardwareReset, Step::bare(Command::SleepOut)];
        let cfg = config(&SCRIPT);

        let mut bus = RecordingBus::new();
        run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg)
            .await
            .unwrap();

        assert_eq!(bus.opcodes(), vec![0x11]);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        static SCRIPT: [Step; 2] = [Step::bare(Command::SleepOut), Step::reg(0xE0, &TOO_LONG)];
        let cfg = config(&SCRIPT);

        let mut bus = RecordingBus::new();
        let result = run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg).await;

        assert_eq!(result, Err(DisplayError::InvalidArgument));
        assert_eq!(bus.opcodes(), vec![0x11], "steps before the bad one ran");
    }

    #[tokio::test]
    async fn test_bus_failure_stops_script() {
        static SCRIPT: [Step; 3] = [
            Step::bare(Command::SoftReset),
            Step::bare(Command::SleepOut),
            Step::bare(Command::DisplayOn),
        ];
        let cfg = config(&SCRIPT);

        let mut bus = RecordingBus::new();
        bus.fail_opcode = Some(0x11);
        let result = run(&mut bus, None::<&mut NoResetPin>, &mut NoopDelay, &cfg).await;

        assert_eq!(result, Err(DisplayError::Communication));
        assert_eq!(bus.opcodes(), vec![0x01]);
    }
}
