//! Driver integration tests: DcsDisplayDriver through the public API.
//!
//! The command stream is captured with `platform::mocks::RecordingBus`, the
//! DMA channel with `MockDma`; wire-level bytes are checked with
//! `embedded-hal-mock`.
//!
//! Run with: cargo test -p panel --test dcs_driver

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_graphics::geometry::Size;
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::digital::{
    Mock as PinMock, State as PinState, Transaction as PinTransaction,
};
use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};
use panel::controllers;
use panel::{
    DcsBus, DcsDisplayDriver, Display, DisplayDriver, DisplayError, DmaPixelPusher, Framebuffer,
    FramebufferPool, NoResetPin, PanelConfig, SpiPixelPusher, Step,
};
use platform::mocks::{BusEvent, MockDma, RecordingBus, RecordingCallback};

type Pusher<'a> = DmaPixelPusher<'a, CriticalSectionRawMutex, MockDma>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the three SPI expectations that correspond to one `spi.write(&data)` call
/// via the `SpiDevice` trait.
fn spi_device_write(data: &[u8]) -> [SpiTransaction<u8>; 3] {
    [
        SpiTransaction::transaction_start(),
        SpiTransaction::write_vec(data.to_vec()),
        SpiTransaction::transaction_end(),
    ]
}

fn leak_buffer(pixels: usize) -> &'static mut [u16] {
    Box::leak(vec![0u16; pixels].into_boxed_slice())
}

/// Finish the running transfer and run the completion interrupt.
fn complete_transfer(pusher: &Pusher<'_>) {
    pusher.with_dma(MockDma::finish);
    pusher.on_dma_interrupt();
}

/// Script that only sets the full window.
static WINDOW_ONLY: [Step; 1] = [Step::FullWindow];

// ---------------------------------------------------------------------------
// Init scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ili9341_init_pulses_reset_and_configures_panel() {
    let mut rst = PinMock::new(&[
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::High),
    ]);
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        Some(rst.clone()),
        NoopDelay,
        SpiPixelPusher::new(),
        PanelConfig::ili9341(),
    );

    drv.init().await.unwrap();

    let bus = drv.bus();
    let opcodes = bus.opcodes();
    assert_eq!(opcodes.first(), Some(&0xEF));
    assert!(bus.events.contains(&BusEvent::Command(0x36, vec![0xE8])), "MADCTL");
    assert!(bus.events.contains(&BusEvent::Command(0x3A, vec![0x55])), "RGB565");
    assert!(
        bus.events.contains(&BusEvent::Command(0x2A, vec![0, 0, 0x01, 0x3F])),
        "columns 0..=319"
    );
    assert!(
        bus.events.contains(&BusEvent::Command(0x2B, vec![0, 0, 0, 0xEF])),
        "rows 0..=239"
    );
    assert_eq!(opcodes.last(), Some(&0x2C));
    // One opcode per command step, two for the full window.
    let expected = controllers::ILI9341
        .iter()
        .map(|step| match step {
            Step::Command { .. } | Step::MemoryAccess | Step::MemoryWrite => 1,
            Step::FullWindow => 2,
            Step::Delay(_) | Step::HardwareReset => 0,
        })
        .sum::<usize>();
    assert_eq!(opcodes.len(), expected);
    rst.done();
}

#[tokio::test]
async fn test_st7735_window_includes_ram_offset() {
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        SpiPixelPusher::new(),
        PanelConfig::st7735_160x128(),
    );
    drv.init().await.unwrap();

    assert!(drv
        .bus()
        .events
        .contains(&BusEvent::Command(0x2A, vec![0, 1, 0, 160])));
    assert!(drv
        .bus()
        .events
        .contains(&BusEvent::Command(0x2B, vec![0, 2, 0, 129])));
}

#[tokio::test]
async fn test_reset_without_pin_is_unavailable() {
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        SpiPixelPusher::new(),
        PanelConfig::st7789_320x240(),
    );
    assert_eq!(drv.reset().await, Err(DisplayError::Unavailable));
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// WriteRow(row 10, col 5, 3 pixels) on an uninitialised-script panel.
#[tokio::test]
async fn test_write_row_wire_format() {
    let spi_expectations: Vec<SpiTransaction<u8>> = [
        &spi_device_write(&[0x2A]) as &[_],
        &spi_device_write(&[0x00, 0x05, 0x00, 0x07]),
        &spi_device_write(&[0x2B]),
        &spi_device_write(&[0x00, 0x0A, 0x00, 0x0A]),
        &spi_device_write(&[0x2C]),
        &spi_device_write(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]),
    ]
    .iter()
    .flat_map(|s| s.iter().cloned())
    .collect();
    let dc_expectations: Vec<PinTransaction> = (0..3)
        .flat_map(|_| {
            [
                PinTransaction::set(PinState::Low),
                PinTransaction::set(PinState::High),
            ]
        })
        .collect();

    let mut spi = SpiMock::new(&spi_expectations);
    let mut dc = PinMock::new(&dc_expectations);
    let mut drv = DcsDisplayDriver::new(
        DcsBus::new(spi.clone(), dc.clone()),
        None::<NoResetPin>,
        NoopDelay,
        SpiPixelPusher::new(),
        PanelConfig::new(320, 240, &[]),
    );

    drv.init().await.unwrap();
    drv.write_row(&[0x1234, 0x5678, 0x9ABC], 10, 5).await.unwrap();

    spi.done();
    dc.done();
}

// ---------------------------------------------------------------------------
// DMA path
// ---------------------------------------------------------------------------

/// Second write while the first is in flight is refused; its callback never
/// fires and the transport is untouched.
#[tokio::test]
async fn test_double_submit_rejected() {
    let mut a = [1u16; 4];
    let mut b = [2u16; 4];
    let cb1 = RecordingCallback::new();
    let cb2 = RecordingCallback::new();
    let pusher: Pusher<'_> = DmaPixelPusher::new(MockDma::new());
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        &pusher,
        PanelConfig::new(2, 2, &WINDOW_ONLY),
    );
    drv.init().await.unwrap();

    let fa = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
    drv.write_framebuffer(fa, &cb1).await.unwrap();
    let events_after_first = drv.bus().events.len();
    let transfers_after_first = pusher.with_dma(|d| d.transfers.len());

    let fb = Framebuffer::from_slice(&mut b, Size::new(2, 2), 4).unwrap();
    let rejected = drv.write_framebuffer(fb, &cb2).await.unwrap_err();
    assert_eq!(rejected.error, DisplayError::FailedPrecondition);
    assert!(rejected.framebuffer.is_valid());
    assert_eq!(drv.bus().events.len(), events_after_first);
    assert_eq!(pusher.with_dma(|d| d.transfers.len()), transfers_after_first);

    assert_eq!(
        drv.write_row(&[0], 0, 0).await,
        Err(DisplayError::FailedPrecondition),
        "rows wait for the frame too"
    );

    complete_transfer(&pusher);
    assert_eq!(cb1.count(), 1);
    assert_eq!(cb2.count(), 0);
}

/// Half-size frame on a DMA pusher streams each source row twice.
#[tokio::test]
async fn test_dma_pixel_double_scanlines() {
    let mut pixels = [0x1111u16, 0x2222, 0x3333, 0x4444];
    let base = pixels.as_ptr() as usize;
    let cb = RecordingCallback::new();
    let pusher: Pusher<'_> = DmaPixelPusher::new(MockDma::new());
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        &pusher,
        PanelConfig::new(4, 4, &WINDOW_ONLY),
    );
    drv.init().await.unwrap();
    assert!(drv.supports_resize());

    let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
    drv.write_framebuffer(fb, &cb).await.unwrap();
    while pusher.is_busy() {
        complete_transfer(&pusher);
    }

    let rows: Vec<usize> = pusher.with_dma(|d| {
        d.transfers
            .iter()
            .map(|t| (t.source - base) / 2 / 2)
            .collect()
    });
    assert_eq!(rows, vec![0, 0, 1, 1]);
    assert_eq!(cb.count(), 1);
    assert_eq!(cb.calls()[0].status, Ok(()));
}

/// Odd-width half-size frames cannot be doubled by the DMA channel and go
/// through the row path instead.
#[tokio::test]
async fn test_odd_width_half_size_frame_is_resized() {
    let mut pixels = [1u16, 2, 3, 4, 5, 6];
    let cb = RecordingCallback::new();
    let pusher: Pusher<'_> = DmaPixelPusher::new(MockDma::new());
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        &pusher,
        PanelConfig::new(6, 4, &WINDOW_ONLY),
    );
    drv.init().await.unwrap();

    let fb = Framebuffer::from_slice(&mut pixels, Size::new(3, 2), 6).unwrap();
    drv.write_framebuffer(fb, &cb).await.unwrap();

    assert!(pusher.with_dma(|d| d.transfers.is_empty()));
    assert_eq!(cb.count(), 1);
    assert_eq!(cb.calls()[0].status, Ok(()));
    let top = [1, 1, 2, 2, 3, 3];
    let bottom = [4, 4, 5, 5, 6, 6];
    let expected: Vec<u16> = [top, top, bottom, bottom].concat();
    assert_eq!(drv.bus().pixels(), expected);
}

/// TE-synced frames wait for the tearing-effect edge.
#[tokio::test]
async fn test_tear_sync_defers_frame_start() {
    let mut pixels = [0u16; 4];
    let cb = RecordingCallback::new();
    let pusher: Pusher<'_> = DmaPixelPusher::with_tear_sync(MockDma::new());
    let mut drv = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        &pusher,
        PanelConfig::new(2, 2, &WINDOW_ONLY),
    );
    drv.init().await.unwrap();

    let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
    drv.write_framebuffer(fb, &cb).await.unwrap();
    assert!(pusher.with_dma(|d| d.transfers.is_empty()));

    pusher.on_tear_effect();
    assert_eq!(pusher.with_dma(|d| d.transfers.len()), 1);
    complete_transfer(&pusher);
    assert_eq!(cb.count(), 1);
}

// ---------------------------------------------------------------------------
// Facade + pool
// ---------------------------------------------------------------------------

/// Frames cycle through the pool: a buffer comes back only when its DMA
/// write completes.
#[tokio::test]
async fn test_pool_buffers_cycle_through_dma_driver() {
    let pool: &'static FramebufferPool<'static, CriticalSectionRawMutex, 2> = Box::leak(
        Box::new(
            FramebufferPool::new([leak_buffer(4), leak_buffer(4)], Size::new(2, 2), 4).unwrap(),
        ),
    );
    let pusher: &'static Pusher<'static> = Box::leak(Box::new(DmaPixelPusher::new(MockDma::new())));
    let driver = DcsDisplayDriver::new(
        RecordingBus::new(),
        None::<NoResetPin>,
        NoopDelay,
        pusher,
        PanelConfig::new(2, 2, &WINDOW_ONLY),
    );
    let mut display = Display::new(driver, pool);
    display.init().await.unwrap();

    for frame in 0..5u16 {
        let mut fb = display.get_framebuffer().await;
        fb.fill(frame);
        display.release_framebuffer(fb).await.unwrap();
        assert_eq!(pool.available(), 1, "one buffer in flight");
        complete_transfer(pusher);
        assert_eq!(pool.available(), 2);
    }
    assert_eq!(pusher.with_dma(|d| d.transfers.len()), 5);
}
