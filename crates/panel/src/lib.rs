//! Panel drivers for DCS-style color displays
//!
//! Controller drivers and pixel transports built on the `platform`
//! contracts: an SPI command bus, init scripts for common panel controllers,
//! a CPU and a DMA pixel pusher, a MIPI-DSI driver, and the [`Display`]
//! facade that ties a driver to a framebuffer pool.
//!
//! # Architecture
//!
//! ```text
//! Application (renders into pool framebuffers)
//!         ↓
//! Display facade (facade module)
//!         ↓
//! DcsDisplayDriver / MipiDsiDriver / NullDisplayDriver
//!         ↓
//! SpiPixelPusher / DmaPixelPusher ──► DcsBus (SPI + D/C pin)
//!         ↓
//! Platform HAL (embedded-hal SpiDevice, OutputPin, DMA channel)
//! ```
//!
//! # Features
//!
//! - `defmt` - defmt logging and `defmt::Format` derives for target builds
//! - `emulator` - Host panel model for desktop runs and tests (tracing)
//! - `std` - Enable standard library (for emulator and testing)
//!
//! # Examples
//!
//! ## Emulator Target
//!
//! ```bash
//! cargo run --example sim_panel --features emulator
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
// Upgrade relevant warns to deny; keep pedantic as warn
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Critical correctness: deny these
#![deny(clippy::await_holding_lock)] // holding a blocking Mutex across .await is a bug
#![deny(unsafe_op_in_unsafe_fn)]
// unsafe fn body is not implicitly unsafe block
// Logging discipline
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // errors are DisplayError variants, documented there
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // opcode names in doc comments
#![allow(clippy::similar_names)] // caset / raset, row / col

pub mod bus;
pub mod config;
pub mod controllers;
pub mod dcs;
pub mod driver;
pub mod facade;
pub mod mipi;
pub mod null;
pub mod pusher;
pub mod resize;
pub mod script;

#[cfg(feature = "emulator")]
pub mod sim;

// Re-export key types
pub use bus::DcsBus;
pub use config::{Orientation, PanelConfig};
pub use driver::{DcsDisplayDriver, NoResetPin};
pub use facade::Display;
pub use mipi::{DsiHost, MipiDsiDriver};
pub use null::NullDisplayDriver;
pub use pusher::{DmaPixelPusher, SpiPixelPusher};
pub use resize::{ResizePlan, RowSegment};
pub use script::Step;

pub use platform::{
    DisplayDriver, DisplayError, Framebuffer, FramebufferPool, PixelPusher, StreamMode,
    WriteCallback, WriteRejected,
};
