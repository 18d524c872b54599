//! Host network stack interface.
//!
//! The RX pipeline hands every accepted frame to a [`HostStack`]. With the
//! `smoltcp-device` feature, [`SmoltcpDevice`] wraps a device and a bounded
//! frame queue into a `smoltcp::phy::Device`.

#[cfg(feature = "smoltcp-device")]
mod smoltcp_device;

#[cfg(feature = "smoltcp-device")]
pub use smoltcp_device::{RxFrameQueue, SmoltcpDevice};

/// Hardware checksum verdict for a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Not validated, the stack must check it.
    None,
    /// Validated by the switch.
    Complete,
}

/// A received Ethernet frame with the switch tag and CRC stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    pub data: Vec<u8>,
    pub checksum: Checksum,
    /// Hardware RX queue the frame arrived on.
    pub queue: u8,
}

impl RxPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of handing a frame to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Dropped,
}

/// Receiving side of the host network stack.
pub trait HostStack: Send + Sync {
    /// Take ownership of one frame.
    ///
    /// # Contract
    /// - MUST NOT block
    /// - MUST NOT call back into the device
    fn deliver(&self, packet: RxPacket) -> Delivery;
}
