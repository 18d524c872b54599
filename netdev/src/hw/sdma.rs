//! SDMA queue and interrupt-mask register sequences.

use super::regs::{
    queue_disable_bit, queue_enable_bit, rx_completion_bits, rx_first_desc,
    rx_resource_error_bits, tx_event_bits, tx_first_desc, RX_MASK_0, RX_QUEUE_CMD, SDMA_CONF,
    SDMA_CONF_RX_BOUNDARIES, TX_MASK_0, TX_QUEUE_CMD,
};
use super::window::Registers;

/// Which queue command register a queue lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Rx,
    Tx,
}

impl QueueKind {
    #[inline]
    fn cmd_reg(self) -> u32 {
        match self {
            Self::Rx => RX_QUEUE_CMD,
            Self::Tx => TX_QUEUE_CMD,
        }
    }
}

impl Registers {
    /// Start the SDMA on `queue`.
    pub fn enable_queue(&self, kind: QueueKind, queue: u8) {
        self.set_bits(kind.cmd_reg(), queue_enable_bit(queue));
    }

    /// Stop the SDMA on `queue`.
    pub fn disable_queue(&self, kind: QueueKind, queue: u8) {
        self.set_bits(kind.cmd_reg(), queue_disable_bit(queue));
    }

    pub fn queue_enabled(&self, kind: QueueKind, queue: u8) -> bool {
        self.read(kind.cmd_reg()) & queue_enable_bit(queue) != 0
    }

    pub fn rx_first_desc(&self, queue: u8) -> u32 {
        self.read(rx_first_desc(queue))
    }

    /// Point RX `queue` at a descriptor.
    ///
    /// With several RX queues active the SDMA may keep using a stale
    /// next-descriptor pointer after the first packet. Writing the register
    /// twice, each time with the queue stopped, makes it pick up the new one.
    pub fn write_rx_first_desc(&self, queue: u8, desc: u32) {
        for _ in 0..2 {
            self.disable_queue(QueueKind::Rx, queue);
            self.write(rx_first_desc(queue), desc);
        }
    }

    pub fn tx_first_desc(&self, queue: u8) -> u32 {
        self.read(tx_first_desc(queue))
    }

    /// Point TX `queue` at a descriptor. Stops the queue first.
    pub fn write_tx_first_desc(&self, queue: u8, desc: u32) {
        self.disable_queue(QueueKind::Tx, queue);
        self.write(tx_first_desc(queue), desc);
    }

    /// Make the SDMA write packets on buffer boundaries.
    pub fn enable_rx_boundaries(&self) {
        self.set_bits(SDMA_CONF, SDMA_CONF_RX_BOUNDARIES);
    }

    /// Mask completion and resource-error interrupts of the RX queues in
    /// `mask`.
    pub fn disable_rx_interrupts(&self, mask: u8) {
        self.clear_bits(
            RX_MASK_0,
            rx_completion_bits(mask) | rx_resource_error_bits(mask),
        );
    }

    /// Unmask completion interrupts of the RX queues in `mask`.
    pub fn enable_rx_interrupts(&self, mask: u8) {
        self.set_bits(RX_MASK_0, rx_completion_bits(mask));
    }

    /// Mask all interrupts of TX `queue`.
    pub fn disable_tx_interrupts(&self, queue: u8) {
        self.clear_bits(TX_MASK_0, tx_event_bits(queue));
    }
}
