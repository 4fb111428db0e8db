//! Framebuffer pool
//!
//! A fixed set of identically shaped pixel buffers behind a counting
//! semaphore. The semaphore is a queue of free slot indices: acquiring pops
//! the oldest free slot (round-robin while buffers come back in order),
//! releasing pushes one back. Releasing never blocks, so it is safe from the
//! DMA completion interrupt when `M` is
//! [`CriticalSectionRawMutex`](embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex).
//!
//! ```text
//!  get_framebuffer ──► [free slots: 1, 0] ──► Framebuffer(slot 1)
//!                            ▲
//!  release_framebuffer ──────┘   (from thread or interrupt)
//! ```

use core::marker::PhantomData;
use core::ptr::NonNull;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embedded_graphics::geometry::Size;

use crate::display::{DisplayError, WriteCallback};
use crate::framebuffer::{Framebuffer, PixelFormat};

/// Fixed set of framebuffers handed out under a counting semaphore.
pub struct FramebufferPool<'a, M: RawMutex, const N: usize> {
    buffers: [NonNull<u16>; N],
    size: Size,
    row_bytes: usize,
    format: PixelFormat,
    free: Channel<M, u8, N>,
    _buffers: PhantomData<&'a mut [u16]>,
}

// SAFETY: the raw buffer pointers come from `&'a mut` slices the pool holds
// exclusively. A slot index lives either in `free` or inside exactly one
// outstanding Framebuffer, so at most one handle aliases each buffer, and
// `free` is itself synchronized by `M`.
unsafe impl<M: RawMutex + Sync, const N: usize> Sync for FramebufferPool<'_, M, N> {}
// SAFETY: see `Sync`; moving the pool moves the exclusive borrows with it.
unsafe impl<M: RawMutex + Send, const N: usize> Send for FramebufferPool<'_, M, N> {}

impl<'a, M: RawMutex, const N: usize> FramebufferPool<'a, M, N> {
    /// Slot indices travel as `u8`, and the queue needs at least one slot.
    const SLOTS_FIT: () = assert!(N > 0 && N <= 255, "pool holds 1..=255 buffers");

    /// Build a pool over `buffers`, all with the same geometry.
    ///
    /// Fails with `InvalidArgument` for a buffer too short for `size` and
    /// `row_bytes`. The buffer count is checked at compile time: an empty
    /// pool does not build.
    ///
    /// ```compile_fail
    /// use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    /// use embedded_graphics::geometry::Size;
    /// use platform::FramebufferPool;
    ///
    /// let _ = FramebufferPool::<NoopRawMutex, 0>::new([], Size::new(4, 4), 8);
    /// ```
    pub fn new(
        buffers: [&'a mut [u16]; N],
        size: Size,
        row_bytes: usize,
    ) -> Result<Self, DisplayError> {
        let () = Self::SLOTS_FIT;
        let format = PixelFormat::Rgb565;
        let needed = Framebuffer::required_len(size, row_bytes, format)?;
        if buffers.iter().any(|b| b.len() < needed) {
            return Err(DisplayError::InvalidArgument);
        }

        let free = Channel::new();
        for slot in 0..N {
            let slot = u8::try_from(slot).map_err(|_| DisplayError::InvalidArgument)?;
            free.try_send(slot).map_err(|_| DisplayError::Internal)?;
        }

        Ok(Self {
            buffers: buffers.map(|b| NonNull::from(b).cast::<u16>()),
            size,
            row_bytes,
            format,
            free,
            _buffers: PhantomData,
        })
    }

    /// Wait for a free buffer.
    ///
    /// Suspends while every buffer is out. Always returns a valid handle.
    pub async fn get_framebuffer(&self) -> Framebuffer<'a> {
        let slot = self.free.receive().await;
        self.handle(slot)
    }

    /// Blocking [`get_framebuffer`](Self::get_framebuffer) for callers
    /// without an executor (host threads, bare-metal main loops).
    pub fn get_framebuffer_blocking(&self) -> Framebuffer<'a> {
        embassy_futures::block_on(self.get_framebuffer())
    }

    /// Take a free buffer without waiting.
    pub fn try_get_framebuffer(&self) -> Result<Framebuffer<'a>, DisplayError> {
        self.free
            .try_receive()
            .map(|slot| self.handle(slot))
            .map_err(|_| DisplayError::ResourceExhausted)
    }

    /// Give a buffer back.
    ///
    /// Interrupt-safe and non-blocking. The buffer need not be the one most
    /// recently handed out. Invalid handles and buffers that do not belong to
    /// this pool are dropped without freeing a slot.
    pub fn release_framebuffer(&self, framebuffer: Framebuffer<'a>) {
        let addr = framebuffer.as_ptr();
        let Some(slot) = self
            .buffers
            .iter()
            .position(|b| core::ptr::eq(b.as_ptr().cast_const(), addr))
            .and_then(|i| u8::try_from(i).ok())
        else {
            #[cfg(feature = "defmt")]
            defmt::warn!("pool: released framebuffer is not from this pool");
            return;
        };
        if self.free.try_send(slot).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("pool: slot {} released twice", slot);
        }
    }

    /// Buffer addresses, for controllers that register them at init.
    ///
    /// Not for general use: writing through these pointers bypasses the
    /// pool's exclusivity guarantee.
    pub fn buffers_for_init_only(&self) -> &[NonNull<u16>] {
        &self.buffers
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total buffers.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Dimensions of every buffer
    pub fn framebuffer_size(&self) -> Size {
        self.size
    }

    /// Row stride of every buffer in bytes
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    fn handle(&self, slot: u8) -> Framebuffer<'a> {
        let Some(ptr) = self.buffers.get(usize::from(slot)) else {
            return Framebuffer::default();
        };
        // SAFETY: `slot` was just removed from `free`, so no other handle
        // points at this buffer until it is released again. The buffer was
        // checked against the geometry in `new` and lives for 'a.
        unsafe { Framebuffer::new(ptr.as_ptr(), self.size, self.row_bytes, self.format) }
            .unwrap_or_default()
    }
}

/// The pool returns its own buffers when a write completes.
impl<'a, M: RawMutex + Sync, const N: usize> WriteCallback<'a> for FramebufferPool<'a, M, N> {
    fn complete(&self, framebuffer: Framebuffer<'a>, status: Result<(), DisplayError>) {
        if let Err(_err) = status {
            #[cfg(feature = "defmt")]
            defmt::warn!("pool: framebuffer write failed: {}", _err);
        }
        self.release_framebuffer(framebuffer);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use proptest::prelude::*;

    type Pool<'a, const N: usize> = FramebufferPool<'a, CriticalSectionRawMutex, N>;

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut a = [0u16; 16];
        let mut b = [0u16; 8];
        let result = Pool::new([&mut a[..], &mut b[..]], Size::new(4, 4), 8);
        assert_eq!(result.err(), Some(DisplayError::InvalidArgument));
    }

    #[test]
    fn test_round_robin_order() {
        let mut a = [0u16; 16];
        let mut b = [0u16; 16];
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let pool = Pool::new([&mut a[..], &mut b[..]], Size::new(4, 4), 8).unwrap();

        let first = pool.try_get_framebuffer().unwrap();
        assert_eq!(first.as_ptr(), pa);
        pool.release_framebuffer(first);
        let second = pool.try_get_framebuffer().unwrap();
        assert_eq!(second.as_ptr(), pb, "next_idx advances past the released buffer");
        let third = pool.try_get_framebuffer().unwrap();
        assert_eq!(third.as_ptr(), pa);
    }

    #[test]
    fn test_try_get_on_empty_pool() {
        let mut a = [0u16; 4];
        let pool = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let held = pool.try_get_framebuffer().unwrap();
        assert_eq!(
            pool.try_get_framebuffer().err(),
            Some(DisplayError::ResourceExhausted)
        );
        pool.release_framebuffer(held);
        assert!(pool.try_get_framebuffer().is_ok());
    }

    #[test]
    fn test_pool_of_one_repeats_address() {
        let mut a = [0u16; 4];
        let addr = a.as_ptr();
        let pool = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        for _ in 0..5 {
            let fb = pool.get_framebuffer_blocking();
            assert_eq!(fb.as_ptr(), addr);
            pool.release_framebuffer(fb);
        }
    }

    #[test]
    fn test_foreign_and_invalid_handles_do_not_free_slots() {
        let mut a = [0u16; 4];
        let mut other = [0u16; 4];
        let pool = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let _held = pool.try_get_framebuffer().unwrap();

        pool.release_framebuffer(Framebuffer::default());
        let foreign = Framebuffer::from_slice(&mut other, Size::new(2, 2), 4).unwrap();
        pool.release_framebuffer(foreign);

        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_pool_is_a_write_callback() {
        let mut a = [0u16; 4];
        let pool = Pool::new([&mut a[..]], Size::new(2, 2), 4).unwrap();
        let fb = pool.try_get_framebuffer().unwrap();
        let hook: &dyn WriteCallback<'_> = &pool;
        hook.complete(fb, Err(DisplayError::Communication));
        assert_eq!(pool.available(), 1, "failed writes still return the buffer");
    }

    #[test]
    fn test_buffers_for_init_only_lists_every_buffer() {
        let mut a = [0u16; 4];
        let mut b = [0u16; 4];
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let pool = Pool::new([&mut a[..], &mut b[..]], Size::new(2, 2), 4).unwrap();
        let regs = pool.buffers_for_init_only();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].as_ptr().cast_const(), pa);
        assert_eq!(regs[1].as_ptr().cast_const(), pb);
    }

    #[tokio::test]
    async fn test_get_framebuffer_waits_for_release() {
        use std::sync::Arc;

        let mem: &'static mut [u16] = Box::leak(vec![0u16; 4].into_boxed_slice());
        let pool: Arc<Pool<'static, 1>> =
            Arc::new(Pool::new([mem], Size::new(2, 2), 4).unwrap());
        let held = pool.get_framebuffer().await;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get_framebuffer().await.as_ptr() as usize })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished(), "acquire must block while the pool is empty");

        let addr = held.as_ptr() as usize;
        pool.release_framebuffer(held);
        assert_eq!(waiter.await.unwrap(), addr);
    }

    proptest! {
        /// Outstanding handles never exceed capacity, and `available`
        /// always equals capacity minus outstanding.
        #[test]
        fn prop_pool_conservation(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut a = [0u16; 4];
            let mut b = [0u16; 4];
            let mut c = [0u16; 4];
            let pool = Pool::new([&mut a[..], &mut b[..], &mut c[..]], Size::new(2, 2), 4).unwrap();
            let mut held = Vec::new();
            for acquire in ops {
                if acquire {
                    match pool.try_get_framebuffer() {
                        Ok(fb) => held.push(fb),
                        Err(e) => {
                            prop_assert_eq!(e, DisplayError::ResourceExhausted);
                            prop_assert_eq!(held.len(), 3);
                        }
                    }
                } else if let Some(fb) = held.pop() {
                    pool.release_framebuffer(fb);
                }
                prop_assert!(held.len() <= pool.capacity());
                prop_assert_eq!(pool.available() + held.len(), pool.capacity());
                let mut addrs: Vec<_> = held.iter().map(|fb| fb.as_ptr() as usize).collect();
                addrs.sort_unstable();
                addrs.dedup();
                prop_assert_eq!(addrs.len(), held.len(), "no buffer handed out twice");
            }
        }
    }
}
