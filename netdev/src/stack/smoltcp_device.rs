//! smoltcp integration.

use std::collections::VecDeque;
use std::sync::Arc;

use dma_pool::PAGE_SIZE;
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use spin::Mutex;

use super::{Delivery, HostStack, RxPacket};
use crate::driver::rx::MAC_HEADER_LEN;
use crate::driver::tx::MAX_TX_FRAME;
use crate::driver::{SdmaDevice, TxFrame};

/// Default number of frames buffered between the poll routine and smoltcp.
pub const DEFAULT_RX_QUEUE_DEPTH: usize = 256;

/// Bounded queue of received frames. Frames arriving while it is full are
/// dropped.
pub struct RxFrameQueue {
    frames: Mutex<VecDeque<RxPacket>>,
    capacity: usize,
}

impl RxFrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn pop(&self) -> Option<RxPacket> {
        self.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl Default for RxFrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RX_QUEUE_DEPTH)
    }
}

impl HostStack for RxFrameQueue {
    fn deliver(&self, packet: RxPacket) -> Delivery {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            return Delivery::Dropped;
        }
        frames.push_back(packet);
        Delivery::Accepted
    }
}

/// `smoltcp::phy::Device` on top of an SDMA device.
///
/// The device must have been created with `rx` as its host stack. Frames
/// show up in `rx` when the host runs `SdmaDevice::poll`.
pub struct SmoltcpDevice {
    device: Arc<SdmaDevice>,
    rx: Arc<RxFrameQueue>,
    mtu: usize,
}

impl SmoltcpDevice {
    pub fn new(device: Arc<SdmaDevice>, rx: Arc<RxFrameQueue>) -> Self {
        let mtu = device.max_frame_size().min(MAX_TX_FRAME);
        Self { device, rx, mtu }
    }

    pub fn device(&self) -> &Arc<SdmaDevice> {
        &self.device
    }
}

impl Device for SmoltcpDevice {
    type RxToken<'a> = SdmaRxToken where Self: 'a;
    type TxToken<'a> = SdmaTxToken<'a> where Self: 'a;

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.mtu;
        caps.medium = Medium::Ethernet;
        caps.max_burst_size = Some(1);
        caps
    }

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let packet = self.rx.pop()?;
        Some((
            SdmaRxToken { packet },
            SdmaTxToken {
                device: &self.device,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if self.device.is_up() {
            Some(SdmaTxToken {
                device: &self.device,
            })
        } else {
            None
        }
    }
}

pub struct SdmaRxToken {
    packet: RxPacket,
}

impl RxToken for SdmaRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.packet.data)
    }
}

pub struct SdmaTxToken<'a> {
    device: &'a Arc<SdmaDevice>,
}

impl<'a> TxToken for SdmaTxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = vec![0u8; len];
        let result = f(&mut buffer);

        // head page first, the rest as page-sized fragments
        let (head, rest) = buffer.split_at(buffer.len().min(MAC_HEADER_LEN + PAGE_SIZE));
        let frags = rest.chunks(PAGE_SIZE).collect::<Vec<_>>();

        if let Err(e) = self.device.start_xmit(&TxFrame::new(head, &frags)) {
            log::debug!("smoltcp transmit dropped: {}", e);
        }

        result
    }
}
