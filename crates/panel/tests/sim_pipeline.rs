//! End-to-end pipeline tests against the simulated panel.
//!
//! Frames go through the real bus encoding into the host panel model, and
//! assertions are made on the resulting GRAM.
//!
//! Run with: cargo test -p panel --features emulator --test sim_pipeline

#![cfg(feature = "emulator")]

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_graphics::geometry::Size;
use panel::dcs::Command;
use panel::sim::{SimDcPin, SimDelay, SimDma, SimResetPin, SimSpi, SimulatedPanel};
use panel::{
    DcsBus, DcsDisplayDriver, Display, DisplayDriver, DisplayError, DmaPixelPusher, Framebuffer,
    FramebufferPool, PanelConfig, SpiPixelPusher, Step,
};
use platform::mocks::RecordingCallback;

type Pool<'a, const N: usize> = FramebufferPool<'a, CriticalSectionRawMutex, N>;
type SimBus = DcsBus<SimSpi, SimDcPin>;

/// Minimal bring-up for a model panel.
static BRING_UP: [Step; 5] = [
    Step::HardwareReset,
    Step::bare(Command::SleepOut),
    Step::bare(Command::DisplayOn),
    Step::FullWindow,
    Step::MemoryWrite,
];

fn spi_driver(
    panel: &SimulatedPanel,
    config: PanelConfig,
) -> DcsDisplayDriver<SimBus, SimResetPin, SimDelay, SpiPixelPusher> {
    DcsDisplayDriver::new(
        DcsBus::new(panel.spi(), panel.dc_pin()),
        Some(panel.reset_pin()),
        panel.delay(),
        SpiPixelPusher::new(),
        config,
    )
}

// ---------------------------------------------------------------------------
// Bring-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ili9341_bring_up() {
    let panel = SimulatedPanel::new(320, 240);
    let mut drv = spi_driver(&panel, PanelConfig::ili9341());

    drv.init().await.unwrap();

    assert!(panel.is_on());
    assert_eq!(panel.resets(), 1);
    assert!(panel.elapsed_ms() >= 200, "reset pulse plus settle");
    assert_eq!(panel.opcodes().last(), Some(&0x2C));
}

#[tokio::test]
async fn test_reset_requires_reinit() {
    let panel = SimulatedPanel::new(4, 4);
    let mut drv = spi_driver(&panel, PanelConfig::new(4, 4, &BRING_UP));
    drv.init().await.unwrap();

    drv.reset().await.unwrap();
    assert!(!panel.is_on());
    assert_eq!(panel.resets(), 2);
    assert_eq!(
        drv.write_row(&[1], 0, 0).await,
        Err(DisplayError::FailedPrecondition)
    );

    drv.init().await.unwrap();
    assert!(panel.is_on());
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_frame_lands_in_gram() {
    let panel = SimulatedPanel::new(3, 2);
    let mut drv = spi_driver(&panel, PanelConfig::new(3, 2, &BRING_UP));
    drv.init().await.unwrap();

    let mut pixels = [1u16, 2, 3, 4, 5, 6];
    let fb = Framebuffer::from_slice(&mut pixels, Size::new(3, 2), 6).unwrap();
    let cb = RecordingCallback::new();
    drv.write_framebuffer(fb, &cb).await.unwrap();

    assert_eq!(panel.row(0), vec![1, 2, 3]);
    assert_eq!(panel.row(1), vec![4, 5, 6]);
    assert_eq!(cb.calls()[0].status, Ok(()));
}

/// [[P, Q], [R, S]] on a 4×4 panel through the DMA pusher.
#[tokio::test]
async fn test_pixel_double_walk_over_dma() {
    let (p, q, r, s) = (0xF800, 0x07E0, 0x001F, 0xFFFF);
    let panel = SimulatedPanel::new(4, 4);
    let mut pixels = [p, q, r, s];
    let cb = RecordingCallback::new();
    let pusher = DmaPixelPusher::<CriticalSectionRawMutex, SimDma>::new(panel.dma());
    let mut drv = DcsDisplayDriver::new(
        DcsBus::new(panel.spi(), panel.dc_pin()),
        Some(panel.reset_pin()),
        panel.delay(),
        &pusher,
        PanelConfig::new(4, 4, &BRING_UP),
    );
    drv.init().await.unwrap();

    let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
    drv.write_framebuffer(fb, &cb).await.unwrap();
    while pusher.is_busy() {
        pusher.on_dma_interrupt();
    }

    assert_eq!(panel.row(0), vec![p, p, q, q]);
    assert_eq!(panel.row(1), vec![p, p, q, q]);
    assert_eq!(panel.row(2), vec![r, r, s, s]);
    assert_eq!(panel.row(3), vec![r, r, s, s]);
    assert_eq!(pusher.with_dma(|d| d.transfers()), 4, "one per scanline");
    assert_eq!(cb.count(), 1);
}

#[tokio::test]
async fn test_pixel_double_walk_over_spi() {
    let (p, q, r, s) = (0xF800, 0x07E0, 0x001F, 0xFFFF);
    let panel = SimulatedPanel::new(4, 4);
    let mut drv = spi_driver(&panel, PanelConfig::new(4, 4, &BRING_UP));
    drv.init().await.unwrap();

    let mut pixels = [p, q, r, s];
    let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
    let cb = RecordingCallback::new();
    drv.write_framebuffer(fb, &cb).await.unwrap();

    assert_eq!(panel.row(0), vec![p, p, q, q]);
    assert_eq!(panel.row(3), vec![r, r, s, s]);
}

/// 2×1 framebuffer on a 6×3 panel: no pixel doubling, so rows are expanded.
#[tokio::test]
async fn test_integer_resize_through_rows() {
    let panel = SimulatedPanel::new(6, 3);
    let mut drv = spi_driver(&panel, PanelConfig::new(6, 3, &BRING_UP));
    drv.init().await.unwrap();

    let mut pixels = [0xAAAA, 0xBBBB];
    let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 1), 4).unwrap();
    let cb = RecordingCallback::new();
    drv.write_framebuffer(fb, &cb).await.unwrap();

    let expected = vec![0xAAAA, 0xAAAA, 0xAAAA, 0xBBBB, 0xBBBB, 0xBBBB];
    for y in 0..3 {
        assert_eq!(panel.row(y), expected, "row {y}");
    }
    assert_eq!(cb.count(), 1);
}

/// A row write moves the window; the next full frame still covers the panel.
#[tokio::test]
async fn test_row_write_then_full_frame() {
    let panel = SimulatedPanel::new(4, 2);
    let mut drv = spi_driver(&panel, PanelConfig::new(4, 2, &BRING_UP));
    drv.init().await.unwrap();

    drv.write_row(&[9, 9], 1, 2).await.unwrap();
    assert_eq!(panel.row(1), vec![0, 0, 9, 9]);

    let mut pixels = [7u16; 8];
    let fb = Framebuffer::from_slice(&mut pixels, Size::new(4, 2), 8).unwrap();
    let cb = RecordingCallback::new();
    drv.write_framebuffer(fb, &cb).await.unwrap();

    assert_eq!(panel.row(0), vec![7; 4]);
    assert_eq!(panel.row(1), vec![7; 4]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// A failed frame still returns its buffer to the pool, and the next frame
/// goes through once the link recovers.
#[tokio::test]
async fn test_transport_failure_recovers() {
    let panel = SimulatedPanel::new(2, 2);
    let mut a = [0u16; 4];
    let pool: Pool<'_, 1> = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
    let mut display = Display::new(spi_driver(&panel, PanelConfig::new(2, 2, &BRING_UP)), &pool);
    display.init().await.unwrap();

    panel.set_fail_writes(true);
    let fb = display.get_framebuffer().await;
    display.release_framebuffer(fb).await.unwrap();
    assert_eq!(pool.available(), 1);

    panel.set_fail_writes(false);
    let mut fb = display.get_framebuffer().await;
    fb.fill(0x1234);
    display.release_framebuffer(fb).await.unwrap();
    assert_eq!(panel.row(1), vec![0x1234, 0x1234]);
    assert_eq!(pool.available(), 1);
}
