//! DMA pixel pusher
//!
//! Streams a framebuffer with a DMA channel while the CPU keeps rendering.
//! The pusher is shared between the driver task and two interrupt handlers:
//!
//! ```text
//! driver task ──► write_framebuffer ──► (memory-write prelude) ──► first transfer
//!                                                                      │
//! TE GPIO IRQ ──► on_tear_effect ──► first transfer (when tear sync is on)
//!                                                                      │
//! DMA IRQ ──► on_dma_interrupt ──► next transfer … last ──► on_complete(fb, status)
//! ```
//!
//! State lives behind a blocking mutex that is only held for short,
//! non-suspending sections. Completion callbacks run after the lock is
//! released, so a callback may immediately submit the next frame.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use platform::{
    CommandBus, DisplayError, Framebuffer, PixelDma, PixelPusher, ScanCursor, Segment,
    StreamMode, WriteCallback, WriteRejected,
};

use crate::dcs::Command;

/// Where an accepted frame is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the next tearing-effect edge before the first transfer.
    AwaitingTearEffect,
    /// Transfers running; the DMA interrupt re-arms the channel.
    Streaming,
}

struct InFlight<'a> {
    framebuffer: Framebuffer<'a>,
    on_complete: &'a dyn WriteCallback<'a>,
    cursor: ScanCursor,
    phase: Phase,
}

/// A finished frame, delivered outside the lock.
type Completion<'a> = (
    Framebuffer<'a>,
    &'a dyn WriteCallback<'a>,
    Result<(), DisplayError>,
);

struct PushState<'a, D> {
    dma: D,
    /// A write was accepted and is running its prelude.
    reserved: bool,
    in_flight: Option<InFlight<'a>>,
    /// Mode the channel is programmed for, if any.
    mode: Option<StreamMode>,
    write_mode_configured: bool,
    tear_sync: bool,
}

impl<'a, D: PixelDma> PushState<'a, D> {
    fn busy(&self) -> bool {
        self.reserved || self.in_flight.is_some() || self.dma.is_busy()
    }

    fn start(&mut self, segment: Segment) -> Result<(), DisplayError> {
        let Some(flight) = self.in_flight.as_ref() else {
            return Err(DisplayError::Internal);
        };
        let base = flight.framebuffer.as_ptr();
        // SAFETY: the cursor was built from this framebuffer's geometry, so
        // `offset + len` stays within the buffer. The framebuffer is parked
        // in `in_flight` until the final completion interrupt, so the memory
        // stays valid and untouched for the whole transfer.
        unsafe { self.dma.start(base.add(segment.offset), segment.len) }.map_err(|_err| {
            #[cfg(feature = "defmt")]
            defmt::warn!("dma: transfer start failed at offset {}", segment.offset);
            DisplayError::Communication
        })
    }

    /// Start the first transfer of the parked frame.
    fn begin_streaming(&mut self) -> Option<Completion<'a>> {
        let first = match self.in_flight.as_mut() {
            Some(flight) => {
                flight.phase = Phase::Streaming;
                flight.cursor.segment()
            }
            None => return None,
        };
        match first {
            Some(segment) => match self.start(segment) {
                Ok(()) => None,
                Err(err) => self.finish(Err(err)),
            },
            None => self.finish(Ok(())),
        }
    }

    fn finish(&mut self, status: Result<(), DisplayError>) -> Option<Completion<'a>> {
        if status.is_err() {
            self.write_mode_configured = false;
        }
        self.in_flight
            .take()
            .map(|flight| (flight.framebuffer, flight.on_complete, status))
    }
}

/// DMA-driven pixel pusher.
///
/// Use through a shared reference: `&DmaPixelPusher` implements
/// [`PixelPusher`], and the same reference is handed to the DMA and TE
/// interrupt handlers.
pub struct DmaPixelPusher<'a, M: RawMutex, D> {
    state: Mutex<M, RefCell<PushState<'a, D>>>,
}

impl<'a, M: RawMutex, D: PixelDma> DmaPixelPusher<'a, M, D> {
    /// Pusher over `dma`, tear sync off.
    pub fn new(dma: D) -> Self {
        Self {
            state: Mutex::new(RefCell::new(PushState {
                dma,
                reserved: false,
                in_flight: None,
                mode: None,
                write_mode_configured: false,
                tear_sync: false,
            })),
        }
    }

    /// Pusher that starts every frame on a tearing-effect edge.
    pub fn with_tear_sync(dma: D) -> Self {
        let pusher = Self::new(dma);
        pusher.set_tear_sync(true);
        pusher
    }

    /// Start frames on the next tearing-effect edge instead of immediately.
    ///
    /// Only the first transfer of a frame waits; later scanlines follow the
    /// DMA completion interrupt.
    pub fn set_tear_sync(&self, enabled: bool) {
        self.state.lock(|s| s.borrow_mut().tear_sync = enabled);
    }

    /// Run `f` with exclusive access to the DMA channel.
    pub fn with_dma<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut().dma))
    }

    /// Output scanline being streamed, or `None` when idle.
    pub fn current_scanline(&self) -> Option<usize> {
        self.state.lock(|s| {
            s.borrow()
                .in_flight
                .as_ref()
                .map(|f| f.cursor.current_scanline())
        })
    }

    /// `true` from `write_framebuffer` until the frame's callback has run.
    pub fn is_busy(&self) -> bool {
        self.state.lock(|s| s.borrow().busy())
    }

    /// Whether the controller is known to be in memory-write mode.
    pub fn write_mode_configured(&self) -> bool {
        self.state.lock(|s| s.borrow().write_mode_configured)
    }

    /// DMA completion interrupt entry point.
    ///
    /// Re-arms the channel with the next chunk or scanline, or completes the
    /// frame after the last one.
    pub fn on_dma_interrupt(&self) {
        let done = self.state.lock(|s| {
            let mut state = s.borrow_mut();
            if !state.dma.acknowledge_irq() {
                return None;
            }
            let next = match state.in_flight.as_mut() {
                Some(flight) if flight.phase == Phase::Streaming => {
                    if let Some(seg) = flight.cursor.segment() {
                        flight.cursor.advance(seg.len);
                    }
                    flight.cursor.segment()
                }
                _ => return None,
            };
            match next {
                Some(segment) => match state.start(segment) {
                    Ok(()) => None,
                    Err(err) => state.finish(Err(err)),
                },
                None => state.finish(Ok(())),
            }
        });
        if let Some((framebuffer, on_complete, status)) = done {
            on_complete.complete(framebuffer, status);
        }
    }

    /// Tearing-effect GPIO interrupt entry point (rising edge).
    pub fn on_tear_effect(&self) {
        let done = self.state.lock(|s| {
            let mut state = s.borrow_mut();
            let armed = matches!(
                state.in_flight.as_ref(),
                Some(flight) if flight.phase == Phase::AwaitingTearEffect
            );
            if armed {
                state.begin_streaming()
            } else {
                None
            }
        });
        if let Some((framebuffer, on_complete, status)) = done {
            on_complete.complete(framebuffer, status);
        }
    }

    /// Claim the pusher for a new frame.
    ///
    /// Returns whether the memory-write prelude is needed.
    fn reserve(&self, framebuffer: &Framebuffer<'a>, mode: StreamMode) -> Result<bool, DisplayError> {
        self.state.lock(|s| {
            let mut state = s.borrow_mut();
            if state.busy() {
                return Err(DisplayError::FailedPrecondition);
            }
            if !framebuffer.is_valid() {
                return Err(DisplayError::InvalidArgument);
            }
            if mode == StreamMode::PixelDouble && framebuffer.size().width % 2 != 0 {
                return Err(DisplayError::InvalidArgument);
            }
            if state.mode != Some(mode) {
                state.write_mode_configured = false;
            }
            state.reserved = true;
            Ok(!state.write_mode_configured)
        })
    }

    /// Park the frame and start it (or arm it for the next TE edge).
    fn launch(
        &self,
        framebuffer: Framebuffer<'a>,
        mode: StreamMode,
        on_complete: &'a dyn WriteCallback<'a>,
        prelude: Result<(), DisplayError>,
    ) -> Option<Completion<'a>> {
        self.state.lock(|s| {
            let mut state = s.borrow_mut();
            state.reserved = false;

            let status = prelude.and_then(|()| {
                if state.mode != Some(mode) {
                    state.dma.configure(mode).map_err(|_err| {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("dma: configure failed");
                        DisplayError::Internal
                    })?;
                    state.mode = Some(mode);
                }
                Ok(())
            });
            if let Err(err) = status {
                state.write_mode_configured = false;
                return Some((framebuffer, on_complete, Err(err)));
            }
            state.write_mode_configured = true;

            let size = framebuffer.size();
            let cursor = ScanCursor::new(
                mode,
                usize::try_from(size.width).unwrap_or(0),
                usize::try_from(size.height).unwrap_or(0),
                framebuffer.stride(),
                state.dma.max_transfer_pixels(),
            );
            let phase = if state.tear_sync {
                Phase::AwaitingTearEffect
            } else {
                Phase::Streaming
            };
            state.in_flight = Some(InFlight {
                framebuffer,
                on_complete,
                cursor,
                phase,
            });
            match phase {
                Phase::AwaitingTearEffect => None,
                Phase::Streaming => state.begin_streaming(),
            }
        })
    }
}

impl<'a, 'p, M: RawMutex, D: PixelDma> PixelPusher<'a> for &'p DmaPixelPusher<'a, M, D> {
    fn supports_pixel_double(&self) -> bool {
        true
    }

    fn is_busy(&self) -> bool {
        (*self).is_busy()
    }

    fn invalidate_write_mode(&mut self) {
        self.state
            .lock(|s| s.borrow_mut().write_mode_configured = false);
    }

    async fn write_framebuffer<B: CommandBus>(
        &mut self,
        bus: &mut B,
        framebuffer: Framebuffer<'a>,
        mode: StreamMode,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> Result<(), WriteRejected<'a>> {
        let needs_prelude = match self.reserve(&framebuffer, mode) {
            Ok(needed) => needed,
            Err(error) => return Err(WriteRejected::new(framebuffer, error)),
        };
        let prelude = if needs_prelude {
            bus.command(Command::MemoryWrite.opcode(), &[]).await
        } else {
            Ok(())
        };
        if let Some((framebuffer, on_complete, status)) =
            self.launch(framebuffer, mode, on_complete, prelude)
        {
            on_complete.complete(framebuffer, status);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embedded_graphics::geometry::Size;
    use platform::mocks::{MockDma, RecordingBus, RecordingCallback};

    type Pusher<'a> = DmaPixelPusher<'a, CriticalSectionRawMutex, MockDma>;

    /// Finish the running transfer and deliver its interrupt.
    fn complete_transfer(pusher: &Pusher<'_>) {
        pusher.with_dma(MockDma::finish);
        pusher.on_dma_interrupt();
    }

    #[tokio::test]
    async fn test_direct_packed_frame_is_one_transfer() {
        let mut pixels = [0u16; 6];
        let base = pixels.as_ptr() as usize;
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(3, 2), 6).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());

        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert_eq!(bus.opcodes(), vec![0x2C], "memory-write before first frame");
        let transfers = pusher.with_dma(|d| d.transfers.clone());
        assert_eq!(transfers.len(), 1);
        assert_eq!((transfers[0].source, transfers[0].pixels), (base, 6));
        assert_eq!(cb.count(), 0, "no completion before the DMA interrupt");

        complete_transfer(&pusher);
        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Ok(()));
        assert!(!(&pusher).is_busy());
    }

    #[tokio::test]
    async fn test_direct_mode_obeys_channel_limit() {
        let mut pixels = [0u16; 12];
        let base = pixels.as_ptr() as usize;
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(4, 3), 8).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let mut dma = MockDma::new();
        dma.max_transfer = Some(5);
        let pusher = Pusher::new(dma);

        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();
        complete_transfer(&pusher);
        complete_transfer(&pusher);
        assert_eq!(cb.count(), 0);
        complete_transfer(&pusher);

        let transfers = pusher.with_dma(|d| d.transfers.clone());
        let chunks: Vec<_> = transfers.iter().map(|t| (t.source - base, t.pixels)).collect();
        assert_eq!(chunks, vec![(0, 5), (10, 5), (20, 2)], "byte offsets of 5+5+2 pixels");
        assert_eq!(cb.count(), 1);
    }

    #[tokio::test]
    async fn test_pixel_double_arms_one_scanline_at_a_time() {
        let mut pixels = [1u16, 2, 3, 4];
        let base = pixels.as_ptr() as usize;
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());

        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::PixelDouble, &cb)
            .await
            .unwrap();

        for expected in 0..4 {
            assert_eq!(pusher.current_scanline(), Some(expected));
            complete_transfer(&pusher);
        }
        assert_eq!(pusher.current_scanline(), None);

        let transfers = pusher.with_dma(|d| d.transfers.clone());
        let rows: Vec<_> = transfers.iter().map(|t| (t.source - base) / 2).collect();
        assert_eq!(rows, vec![0, 0, 2, 2], "scanline s reads source row s/2");
        assert!(transfers.iter().all(|t| t.mode == StreamMode::PixelDouble && t.pixels == 2));
        assert_eq!(cb.count(), 1);
    }

    #[tokio::test]
    async fn test_pixel_double_rejects_odd_width() {
        let mut pixels = [0u16; 3];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(3, 1), 6).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());

        let rejected = (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::PixelDouble, &cb)
            .await
            .unwrap_err();

        assert_eq!(rejected.error, DisplayError::InvalidArgument);
        assert!(rejected.framebuffer.is_valid());
        assert!(bus.events.is_empty());
    }

    #[tokio::test]
    async fn test_second_write_rejected_while_in_flight() {
        let mut a = [0u16; 4];
        let mut b = [0u16; 4];
        let b_addr = b.as_ptr() as usize;
        let cb1 = RecordingCallback::new();
        let cb2 = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());

        let fb = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb1)
            .await
            .unwrap();
        let events_before = bus.events.len();

        let fb = Framebuffer::from_slice(&mut b, Size::new(2, 2), 4).unwrap();
        let rejected = (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb2)
            .await
            .unwrap_err();

        assert_eq!(rejected.error, DisplayError::FailedPrecondition);
        assert_eq!(rejected.framebuffer.as_ptr() as usize, b_addr);
        assert_eq!(bus.events.len(), events_before, "transport untouched");
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 1);

        complete_transfer(&pusher);
        assert_eq!(cb1.count(), 1);
        assert_eq!(cb2.count(), 0);
    }

    #[tokio::test]
    async fn test_tear_sync_defers_first_transfer() {
        let mut pixels = [0u16; 4];
        let fb = Framebuffer::from_slice(&mut pixels, Size::new(2, 2), 4).unwrap();
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::with_tear_sync(MockDma::new());

        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert!((&pusher).is_busy());
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 0, "waiting for TE");

        // A stray DMA interrupt must not start the frame.
        pusher.on_dma_interrupt();
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 0);

        pusher.on_tear_effect();
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 1);

        // Later TE edges do not restart anything.
        pusher.on_tear_effect();
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 1);

        complete_transfer(&pusher);
        assert_eq!(cb.count(), 1);
    }

    #[tokio::test]
    async fn test_start_error_reaches_callback_and_recovers() {
        let mut a = [0u16; 4];
        let mut b = [0u16; 4];
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let mut dma = MockDma::new();
        dma.fail_next_start = true;
        let pusher = Pusher::new(dma);

        let fb = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert_eq!(cb.count(), 1);
        assert_eq!(cb.calls()[0].status, Err(DisplayError::Communication));
        assert!(cb.calls()[0].valid);
        assert!(!(&pusher).is_busy());
        assert!(!pusher.write_mode_configured());

        // Next write re-sends memory-write and succeeds.
        let fb = Framebuffer::from_slice(&mut b, Size::new(2, 2), 4).unwrap();
        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();
        complete_transfer(&pusher);

        assert_eq!(bus.opcodes(), vec![0x2C, 0x2C]);
        assert_eq!(cb.count(), 2);
        assert_eq!(cb.calls()[1].status, Ok(()));
    }

    #[tokio::test]
    async fn test_prelude_error_reaches_callback() {
        let mut a = [0u16; 4];
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        bus.fail_opcode = Some(0x2C);
        let pusher = Pusher::new(MockDma::new());

        let fb = Framebuffer::from_slice(&mut a, Size::new(2, 2), 4).unwrap();
        (&pusher)
            .write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb)
            .await
            .unwrap();

        assert_eq!(cb.calls()[0].status, Err(DisplayError::Communication));
        assert_eq!(pusher.with_dma(|d| d.transfers.len()), 0);
        assert!(!(&pusher).is_busy());
    }

    #[tokio::test]
    async fn test_mode_switch_reconfigures_and_resends_memory_write() {
        let mut bufs = [[0u16; 4]; 3];
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());

        let modes = [StreamMode::Direct, StreamMode::Direct, StreamMode::PixelDouble];
        for (buf, mode) in bufs.iter_mut().zip(modes) {
            let fb = Framebuffer::from_slice(buf, Size::new(2, 2), 4).unwrap();
            (&pusher).write_framebuffer(&mut bus, fb, mode, &cb).await.unwrap();
            while (&pusher).is_busy() {
                complete_transfer(&pusher);
            }
        }

        assert_eq!(
            pusher.with_dma(|d| d.configured.clone()),
            vec![StreamMode::Direct, StreamMode::PixelDouble]
        );
        assert_eq!(bus.opcodes(), vec![0x2C, 0x2C]);
        assert_eq!(cb.count(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_write_mode_forces_prelude() {
        let [mut a, mut b, mut c] = [[0u16; 4]; 3];
        let cb = RecordingCallback::new();
        let mut bus = RecordingBus::new();
        let pusher = Pusher::new(MockDma::new());
        let mut handle = &pusher;

        for buf in [&mut a, &mut b] {
            let fb = Framebuffer::from_slice(buf, Size::new(2, 2), 4).unwrap();
            handle.write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb).await.unwrap();
            complete_transfer(&pusher);
        }
        assert_eq!(bus.opcodes(), vec![0x2C]);

        handle.invalidate_write_mode();
        let fb = Framebuffer::from_slice(&mut c, Size::new(2, 2), 4).unwrap();
        handle.write_framebuffer(&mut bus, fb, StreamMode::Direct, &cb).await.unwrap();
        assert_eq!(bus.opcodes(), vec![0x2C, 0x2C]);
    }
}
