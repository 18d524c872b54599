//! Hardware access layer.
//!
//! - `mmio`: BAR register access
//! - `window`: iATU translation of switch addresses
//! - `sdma`: queue and interrupt-mask sequences
//! - `mg_window`: memory windows the SDMA sees host memory through

pub mod barriers;
pub mod mg_window;
pub mod mmio;
pub mod regs;
pub mod sdma;
pub mod variant;
pub mod window;

pub use mg_window::{MgWindows, WindowSpan};
pub use mmio::{MappedBar, MmioRegion};
pub use sdma::QueueKind;
pub use variant::DeviceVariant;
pub use window::Registers;
