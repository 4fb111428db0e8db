//! Touchscreen pass-through
//!
//! Panels with an integrated touch controller expose it through the display
//! driver so the application reaches both through the same facade.

/// A touch sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchPoint {
    /// Column in panel coordinates
    pub x: i32,
    /// Row in panel coordinates
    pub y: i32,
    /// Pressure; 0 when not touched
    pub pressure: i32,
}

/// Touch controller attached to a panel
pub trait Touchscreen {
    /// Whether the controller responded at init.
    fn available(&self) -> bool;

    /// Whether a new sample arrived since the last call.
    fn new_event(&mut self) -> bool;

    /// Latest sample.
    fn touch_point(&mut self) -> TouchPoint;
}

/// Placeholder for panels without touch
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTouchscreen;

impl Touchscreen for NoTouchscreen {
    fn available(&self) -> bool {
        false
    }

    fn new_event(&mut self) -> bool {
        false
    }

    fn touch_point(&mut self) -> TouchPoint {
        TouchPoint::default()
    }
}
