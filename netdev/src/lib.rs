//! Network device driver for the CPU port of PCI switch ASICs.
//!
//! The switch moves packets to and from host memory with its SDMA engine.
//! This crate programs the engine's descriptor rings and memory windows,
//! bridges its interrupt to a budgeted poll routine and exposes the result
//! as a network device.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ bus::probe / config (string parameters) / stack adapter       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ driver::SdmaDevice   open · stop · start_xmit · poll           │
//! ├───────────────┬───────────────┬──────────────────────────────┤
//! │ driver::rx    │ driver::tx    │ driver::irq (sdma-irq thread) │
//! ├───────────────┴───────────────┴──────────────────────────────┤
//! │ dma: descriptors, rings        dma_pool: coherent arena       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ hw: registers through the iATU window, memory windows         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform services (BAR mapping, DMA memory, interrupt delivery, the poll
//! scheduler, time) come in through the traits in [`hw`], [`dma_pool`],
//! [`driver::traits`], [`time`] and [`bus`].
//!
//! # Usage
//!
//! ```ignore
//! let attached = bus::probe(pci, services)?;
//! let dev = attached.device().clone();
//! dev.set_parameter("tx_queue", "0")?;
//! dev.set_parameter("rx_queues", "0x1")?;
//! dev.open()?;
//!
//! loop {
//!     if poll_state.is_pending() {
//!         dev.poll(dev.poll_budget());
//!     }
//! }
//! ```

pub mod bus;
pub mod config;
pub mod dma;
pub mod driver;
pub mod error;
pub mod hw;
pub mod stack;
pub mod stats;
pub mod time;

pub use config::{ConfigError, DriverConfig, Parameter};
pub use driver::{DeviceResources, SdmaDevice, TxError, TxFrame};
pub use error::{Result, SdmaError};
pub use stack::{Checksum, Delivery, HostStack, RxPacket};
