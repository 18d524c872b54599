//! Circular descriptor ring.
//!
//! ```text
//!  slot 0 ──> slot 1 ──> ... ──> slot N-1
//!    ▲                              │
//!    └──────────────────────────────┘
//! ```
//!
//! Descriptors are carved as one block from the coherent arena, so slot `i`
//! lives at `base + i * 16` on the bus.

use dma_pool::CoherentArena;

use super::descriptor::{DescriptorSlot, HwDescriptor, DESC_SIZE};
use crate::error::{Result, SdmaError};

/// Fixed-size ring of descriptors with independent descriptor and buffer
/// cursors.
pub struct DescriptorRing {
    slots: Vec<DescriptorSlot>,
    base_bus: u32,
    /// Next descriptor to look at.
    desc_cursor: usize,
    /// Buffer matching `desc_cursor` (one buffer per packet for now).
    buf_cursor: usize,
}

impl DescriptorRing {
    /// Carve `size` descriptors and link them into a closed cycle.
    ///
    /// All command words start at zero (CPU owned).
    pub fn build(arena: &mut CoherentArena, size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(SdmaError::InvalidRingSize(size));
        }

        let region = arena.allocate(size * DESC_SIZE)?;
        let base_bus = region.bus_addr32()?;
        if u64::from(base_bus) + (size * DESC_SIZE) as u64 > u64::from(u32::MAX) + 1 {
            return Err(SdmaError::Dma(dma_pool::DmaError::AddressOutOfRange));
        }

        let first = region.cpu_ptr() as *mut HwDescriptor;
        let slots = (0..size)
            .map(|i| {
                // SAFETY: slot i is inside the carve-out, which stays alive
                // until the arena is released after the ring is dropped.
                let ptr = unsafe { core::ptr::NonNull::new_unchecked(first.add(i)) };
                unsafe { DescriptorSlot::new(ptr, base_bus + (i * DESC_SIZE) as u32) }
            })
            .collect::<Vec<_>>();

        for (i, slot) in slots.iter().enumerate() {
            slot.set_cmd(0);
            slot.set_byte_count(0);
            slot.set_buffer_addr(0);
            slot.set_next_desc(slots[(i + 1) & (size - 1)].bus_addr());
        }

        Ok(Self {
            slots,
            base_bus,
            desc_cursor: 0,
            buf_cursor: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bus address of slot 0.
    #[inline]
    pub fn base_bus(&self) -> u32 {
        self.base_bus
    }

    /// Slot `index` modulo the ring size.
    #[inline]
    pub fn slot(&self, index: usize) -> &DescriptorSlot {
        &self.slots[self.wrap(index)]
    }

    #[inline]
    pub fn wrap(&self, index: usize) -> usize {
        index & (self.slots.len() - 1)
    }

    #[inline]
    pub fn desc_cursor(&self) -> usize {
        self.desc_cursor
    }

    #[inline]
    pub fn buf_cursor(&self) -> usize {
        self.buf_cursor
    }

    /// Slot under the descriptor cursor.
    #[inline]
    pub fn current(&self) -> &DescriptorSlot {
        &self.slots[self.desc_cursor]
    }

    /// Move both cursors to the next slot.
    #[inline]
    pub fn advance(&mut self) {
        self.desc_cursor = self.wrap(self.desc_cursor + 1);
        self.buf_cursor = self.wrap(self.buf_cursor + 1);
    }

    pub fn reset_cursors(&mut self) {
        self.desc_cursor = 0;
        self.buf_cursor = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &DescriptorSlot> {
        self.slots.iter()
    }
}
