//! DMA structures shared with the SDMA.
//!
//! - `descriptor`: 16-byte hardware descriptor and its bit layout
//! - `ring`: circular descriptor rings carved from the coherent arena

pub mod descriptor;
pub mod ring;

use std::sync::Arc;

use dma_pool::DmaPlatform;

pub use descriptor::{DescriptorSlot, HwDescriptor, Owner, RxCmd, TxCmd, DESC_SIZE};
pub use ring::DescriptorRing;

/// Platform DMA services shared by the device and its rings.
pub type SharedDmaPlatform = Arc<dyn DmaPlatform + Send + Sync>;
