//! Display abstraction layer
//!
//! Contracts shared by every stage of the output pipeline:
//!
//! ```text
//! Display facade ──► DisplayDriver ──► PixelPusher ──► transport (SPI / DMA / DSI)
//!       ▲                                   │
//!       └──────── WriteCallback ◄───────────┘   (may run in interrupt context)
//! ```

use core::future::Future;

use crate::dma::StreamMode;
use crate::framebuffer::Framebuffer;
use crate::touch::TouchPoint;

/// Display driver trait for DCS-style panel controllers
pub trait DisplayDriver<'a> {
    /// Run the controller's init script.
    ///
    /// Every other operation requires a successful `init`.
    fn init(&mut self) -> impl Future<Output = Result<(), DisplayError>>;

    /// Hand a framebuffer to the transport.
    ///
    /// On `Ok` the driver owns `framebuffer` until `on_complete` fires,
    /// exactly once, possibly from an interrupt. On `Err` the handle comes
    /// back inside [`WriteRejected`] and the callback is never invoked.
    fn write_framebuffer(
        &mut self,
        framebuffer: Framebuffer<'a>,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> impl Future<Output = Result<(), WriteRejected<'a>>>;

    /// Write one run of pixels at (`row`, `col`) synchronously.
    fn write_row(
        &mut self,
        pixels: &[u16],
        row: u16,
        col: u16,
    ) -> impl Future<Output = Result<(), DisplayError>>;

    /// Panel width in pixels
    fn width(&self) -> u16;

    /// Panel height in pixels
    fn height(&self) -> u16;

    /// Whether the transport can upscale during streaming.
    fn supports_resize(&self) -> bool {
        false
    }

    /// Whether a touch controller is attached.
    fn touchscreen_available(&self) -> bool {
        false
    }

    /// Whether a touch event arrived since the last call.
    fn new_touch_event(&mut self) -> bool {
        false
    }

    /// Latest touch point.
    fn touch_point(&mut self) -> TouchPoint {
        TouchPoint::default()
    }
}

/// Transport that streams a whole framebuffer to the controller.
pub trait PixelPusher<'a> {
    /// Whether [`StreamMode::PixelDouble`] is supported.
    fn supports_pixel_double(&self) -> bool;

    /// `true` while a write is in flight.
    fn is_busy(&self) -> bool;

    /// Forget that the controller is in memory-write mode.
    ///
    /// The driver calls this whenever it sends any other command, so the next
    /// write re-issues the write-memory opcode first.
    fn invalidate_write_mode(&mut self);

    /// Begin streaming `framebuffer`.
    ///
    /// At most one write may be in flight; a second call returns
    /// [`DisplayError::FailedPrecondition`] without touching the transport.
    fn write_framebuffer<B: CommandBus>(
        &mut self,
        bus: &mut B,
        framebuffer: Framebuffer<'a>,
        mode: StreamMode,
        on_complete: &'a dyn WriteCallback<'a>,
    ) -> impl Future<Output = Result<(), WriteRejected<'a>>>;
}

/// Command channel to a DCS controller.
///
/// A command frame drives D/C low for the opcode and high for the data bytes,
/// so after any command the bus is left in data mode.
pub trait CommandBus {
    /// Send `opcode` followed by `data`.
    fn command(
        &mut self,
        opcode: u8,
        data: &[u8],
    ) -> impl Future<Output = Result<(), DisplayError>>;

    /// Stream RGB565 pixels in data mode, most-significant byte first.
    fn write_pixels<I>(&mut self, pixels: I) -> impl Future<Output = Result<(), DisplayError>>
    where
        I: IntoIterator<Item = u16>;
}

/// Completion hook for an accepted framebuffer write.
///
/// Invoked exactly once with the moved-in framebuffer and the transport
/// status. May run in interrupt context, so implementations must be short and
/// must not block.
pub trait WriteCallback<'a>: Sync {
    /// Take back `framebuffer` once its pixels reached the controller.
    fn complete(&self, framebuffer: Framebuffer<'a>, status: Result<(), DisplayError>);
}

impl<'a, F> WriteCallback<'a> for F
where
    F: Fn(Framebuffer<'a>, Result<(), DisplayError>) + Sync,
{
    fn complete(&self, framebuffer: Framebuffer<'a>, status: Result<(), DisplayError>) {
        self(framebuffer, status);
    }
}

/// A write refused before it started; carries the handle back to the caller.
#[derive(Debug)]
pub struct WriteRejected<'a> {
    /// The framebuffer that was not accepted
    pub framebuffer: Framebuffer<'a>,
    /// Why it was refused
    pub error: DisplayError,
}

impl<'a> WriteRejected<'a> {
    /// Pair a refused framebuffer with its error.
    pub fn new(framebuffer: Framebuffer<'a>, error: DisplayError) -> Self {
        Self { framebuffer, error }
    }
}

impl core::fmt::Display for WriteRejected<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Framebuffer write rejected: {}", self.error)
    }
}

/// Display errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayError {
    /// Invalid framebuffer, non-integer resize ratio, out-of-range coordinate
    InvalidArgument,
    /// Write submitted while another is pending, or use before init
    FailedPrecondition,
    /// Transport or optional hardware not available
    Unavailable,
    /// Transport timeout
    DeadlineExceeded,
    /// Non-blocking acquire on an empty pool
    ResourceExhausted,
    /// Controller reported an unexpected condition
    Internal,
    /// Pixel query outside framebuffer bounds
    OutOfRange,
    /// Operation not provided by this driver
    Unimplemented,
    /// SPI / DSI write failed
    Communication,
    /// GPIO pin error
    Gpio,
}

#[cfg(feature = "std")]
impl std::error::Error for DisplayError {}

impl core::fmt::Display for DisplayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid display argument"),
            Self::FailedPrecondition => write!(f, "Display not ready for this operation"),
            Self::Unavailable => write!(f, "Display resource unavailable"),
            Self::DeadlineExceeded => write!(f, "Display transport timeout"),
            Self::ResourceExhausted => write!(f, "No framebuffer available"),
            Self::Internal => write!(f, "Display controller internal error"),
            Self::OutOfRange => write!(f, "Pixel coordinate out of range"),
            Self::Unimplemented => write!(f, "Operation not implemented by this driver"),
            Self::Communication => write!(f, "Display communication error"),
            Self::Gpio => write!(f, "Display GPIO error"),
        }
    }
}
