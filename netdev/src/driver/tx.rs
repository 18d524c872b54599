//! TX pipeline.
//!
//! One frame is in flight at a time. The frame is copied into coherent
//! scratch memory and described by a short chain starting at slot 0:
//!
//! ```text
//! slot 0     slot 1     slot 2        slot 3 ...      slot n
//! ┌───────┐  ┌───────┐  ┌──────────┐  ┌──────────┐    ┌──────────┐
//! │ MACs  │─>│ tag   │─>│ head     │─>│ frag 0   │ .. │ frag k   │─> 0
//! │ 12 B  │  │ 1-16 B│  │ page 0   │  │ page 1   │    │ page k+1 │
//! └───────┘  └───────┘  └──────────┘  └──────────┘    └──────────┘
//!  FIRST                                                LAST
//! ```
//!
//! The first slot is published last, then the queue is started and the CPU
//! spins until the SDMA hands slot 0 back.

use dma_pool::{CoherentArena, DmaRegion, PAGE_SIZE};

use super::rx::MAC_HEADER_LEN;
use super::traits::TxError;
use crate::dma::descriptor::tx_set_byte_count;
use crate::dma::{DescriptorRing, Owner, TxCmd, DESC_SIZE};
use crate::error::Result;
use crate::hw::barriers::mb;
use crate::hw::{QueueKind, Registers};
use crate::time::Clock;

/// Payload fragments on top of the linear head.
pub const MAX_FRAGS: usize = 8;
/// MAC slot, tag slot, head slot and one slot per fragment.
pub const TX_RING_SIZE: usize = (MAX_FRAGS + 3).next_power_of_two();
/// Longest frame a chain carries: MACs plus one page for the head and for
/// each fragment.
pub const MAX_TX_FRAME: usize = MAC_HEADER_LEN + PAGE_SIZE * (MAX_FRAGS + 1);
/// The head segment is padded to this many bytes.
pub const MIN_TX_HEAD: usize = 64;
/// How long the CPU waits for the SDMA to take a chain.
pub const TX_WAIT_US: u64 = 100_000;
pub const MAX_TAG_SIZE: usize = 16;
/// Forwarding tag used until one is configured.
pub const DEFAULT_TX_TAG: [u8; 4] = [0xC8, 0x00, 0x40, 0x01];

/// Tag inserted after the MAC addresses of every transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTag {
    bytes: [u8; MAX_TAG_SIZE],
    len: usize,
}

impl TxTag {
    /// `None` when `tag` is empty or longer than [`MAX_TAG_SIZE`].
    pub fn new(tag: &[u8]) -> Option<Self> {
        if tag.is_empty() || tag.len() > MAX_TAG_SIZE {
            return None;
        }
        let mut bytes = [0u8; MAX_TAG_SIZE];
        bytes[..tag.len()].copy_from_slice(tag);
        Some(Self {
            bytes,
            len: tag.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for TxTag {
    fn default() -> Self {
        let mut bytes = [0u8; MAX_TAG_SIZE];
        bytes[..DEFAULT_TX_TAG.len()].copy_from_slice(&DEFAULT_TX_TAG);
        Self {
            bytes,
            len: DEFAULT_TX_TAG.len(),
        }
    }
}

/// A frame to transmit: a linear head starting with the MAC addresses,
/// followed by payload fragments.
#[derive(Debug, Clone, Copy)]
pub struct TxFrame<'a> {
    pub head: &'a [u8],
    pub frags: &'a [&'a [u8]],
}

impl<'a> TxFrame<'a> {
    pub fn new(head: &'a [u8], frags: &'a [&'a [u8]]) -> Self {
        Self { head, frags }
    }

    /// A frame held in one buffer.
    pub fn linear(data: &'a [u8]) -> Self {
        Self { head: data, frags: &[] }
    }

    /// Total frame length.
    pub fn len(&self) -> usize {
        self.head.len() + self.frags.iter().map(|f| f.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> core::result::Result<(), TxError> {
        if self.frags.len() > MAX_FRAGS {
            return Err(TxError::TooManyFragments(self.frags.len()));
        }
        if self.head.len() < MAC_HEADER_LEN {
            return Err(TxError::FrameTooShort);
        }
        if self.head.len() - MAC_HEADER_LEN > PAGE_SIZE {
            return Err(TxError::FragmentTooLarge);
        }
        for frag in self.frags {
            if frag.is_empty() {
                return Err(TxError::EmptyFragment);
            }
            if frag.len() > PAGE_SIZE {
                return Err(TxError::FragmentTooLarge);
            }
        }
        Ok(())
    }
}

/// TX ring and scratch memory of the configured TX queue.
pub struct TxPath {
    queue: u8,
    ring: DescriptorRing,
    mac_scratch: DmaRegion,
    tag_scratch: DmaRegion,
    /// One page for the head plus one per fragment.
    pages: DmaRegion,
}

impl TxPath {
    /// Coherent carve-outs [`setup`](Self::setup) makes, in order.
    pub const fn arena_carves() -> [usize; 4] {
        [
            TX_RING_SIZE * DESC_SIZE,
            PAGE_SIZE * (MAX_FRAGS + 1),
            MAC_HEADER_LEN,
            MAX_TAG_SIZE,
        ]
    }

    pub fn setup(regs: &Registers, arena: &mut CoherentArena, queue: u8) -> Result<Self> {
        let ring = DescriptorRing::build(arena, TX_RING_SIZE)?;
        let pages = arena.allocate(PAGE_SIZE * (MAX_FRAGS + 1))?;
        let mac_scratch = arena.allocate(MAC_HEADER_LEN)?;
        let tag_scratch = arena.allocate(MAX_TAG_SIZE)?;

        // every scratch buffer must be reachable with a 32-bit pointer
        pages.bus_addr32()?;
        mac_scratch.bus_addr32()?;
        tag_scratch.bus_addr32()?;

        regs.write_tx_first_desc(queue, ring.base_bus());

        log::info!("tx: queue {} ring at 0x{:08x}", queue, ring.base_bus());

        Ok(Self {
            queue,
            ring,
            mac_scratch,
            tag_scratch,
            pages,
        })
    }

    /// Detach the ring from the queue.
    pub fn teardown(&self, regs: &Registers) {
        regs.write_tx_first_desc(self.queue, 0);
    }

    pub fn queue(&self) -> u8 {
        self.queue
    }

    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    /// Send one frame and wait until the SDMA has taken it.
    ///
    /// # Returns
    /// - `Ok(bytes)`: payload bytes sent, MAC addresses and tag excluded,
    ///   head padding included
    /// - `Err(TxError::Timeout)`: the SDMA kept slot 0 past [`TX_WAIT_US`]
    ///
    /// # Contract
    /// - Slot 0 is published only after every other slot of the chain
    /// - On return the ring is linked as a full cycle again and the cursors
    ///   are back at slot 0, whether or not the SDMA took the chain
    pub fn xmit(
        &mut self,
        regs: &Registers,
        clock: &dyn Clock,
        frame: &TxFrame<'_>,
        tag: &TxTag,
    ) -> core::result::Result<usize, TxError> {
        frame.validate()?;

        let segments = self.stage(frame, tag);

        let first = *self.ring.current();
        let mut idx = self.ring.desc_cursor();

        first.set_cmd(0);
        first.set_buffer_addr(bus32(&self.mac_scratch));
        first.set_byte_count(tx_set_byte_count(0, MAC_HEADER_LEN as u32));
        idx += 1;

        let tag_slot = *self.ring.slot(idx);
        tag_slot.set_buffer_addr(bus32(&self.tag_scratch));
        tag_slot.set_byte_count(tx_set_byte_count(0, tag.len() as u32));
        tag_slot.set_cmd((TxCmd::OWN_SDMA | TxCmd::CRC).bits());

        let mut last = tag_slot;
        let mut total = 0;
        for &(bus, len) in &segments {
            idx += 1;
            let slot = *self.ring.slot(idx);
            slot.set_buffer_addr(bus);
            slot.set_byte_count(tx_set_byte_count(0, len as u32));
            slot.set_cmd((TxCmd::OWN_SDMA | TxCmd::CRC).bits());
            total += len;
            last = slot;
        }

        last.set_cmd(last.cmd() | TxCmd::LAST.bits());
        let saved_next = last.next_desc();
        last.set_next_desc(0);

        regs.write_tx_first_desc(self.queue, first.bus_addr());
        first.publish((TxCmd::OWN_SDMA | TxCmd::CRC | TxCmd::FIRST).bits());
        mb();
        regs.enable_queue(QueueKind::Tx, self.queue);

        let start = clock.now_us();
        let took = loop {
            if first.owner() == Owner::Cpu {
                break true;
            }
            if clock.now_us().saturating_sub(start) > TX_WAIT_US {
                break false;
            }
            clock.relax();
        };

        last.set_next_desc(saved_next);
        self.ring.reset_cursors();

        if !took {
            log::warn!("tx queue {}: SDMA did not take the descriptors", self.queue);
            return Err(TxError::Timeout);
        }

        Ok(total)
    }

    /// Copy the frame into scratch memory.
    ///
    /// Returns `(bus address, length)` of every data segment.
    fn stage(&mut self, frame: &TxFrame<'_>, tag: &TxTag) -> Vec<(u32, usize)> {
        let pages_bus = bus32(&self.pages);
        let mut segments = Vec::with_capacity(frame.frags.len() + 1);

        // SAFETY: no chain is in flight, the SDMA does not read scratch
        // memory between transmits.
        let mac = unsafe { self.mac_scratch.as_mut_slice() };
        mac[..MAC_HEADER_LEN].copy_from_slice(&frame.head[..MAC_HEADER_LEN]);

        let tag_buf = unsafe { self.tag_scratch.as_mut_slice() };
        tag_buf[..tag.len()].copy_from_slice(tag.as_bytes());

        let pages = unsafe { self.pages.as_mut_slice() };

        let head = &frame.head[MAC_HEADER_LEN..];
        if !head.is_empty() || frame.frags.is_empty() {
            let page = &mut pages[..PAGE_SIZE];
            page[..head.len()].copy_from_slice(head);
            page[head.len()..].fill(0);
            segments.push((pages_bus, head.len().max(MIN_TX_HEAD)));
        }

        for (i, frag) in frame.frags.iter().enumerate() {
            let offset = (i + 1) * PAGE_SIZE;
            pages[offset..offset + frag.len()].copy_from_slice(frag);
            segments.push((pages_bus + offset as u32, frag.len()));
        }

        segments
    }
}

/// Bus address of a scratch region, checked at setup.
#[inline]
fn bus32(region: &DmaRegion) -> u32 {
    region.bus_addr() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_holds_longest_chain() {
        assert_eq!(TX_RING_SIZE, 16);
        assert!(TX_RING_SIZE >= MAX_FRAGS + 3);
    }

    #[test]
    fn test_tag_bounds() {
        assert_eq!(TxTag::default().as_bytes(), &DEFAULT_TX_TAG);
        assert!(TxTag::new(&[]).is_none());
        assert!(TxTag::new(&[0; 17]).is_none());
        assert_eq!(TxTag::new(&[1; 16]).unwrap().len(), 16);
    }

    #[test]
    fn test_frame_validation() {
        let mac = [0u8; 12];
        let big = vec![0u8; PAGE_SIZE + 1];
        let small = [1u8; 10];
        let small: &[u8] = &small;
        let empty: &[u8] = &[];

        assert_eq!(TxFrame::linear(&mac[..11]).validate(), Err(TxError::FrameTooShort));
        assert_eq!(TxFrame::linear(&mac).validate(), Ok(()));

        let frags = [small; 9];
        assert_eq!(
            TxFrame::new(&mac, &frags).validate(),
            Err(TxError::TooManyFragments(9))
        );

        let frags = [small, big.as_slice()];
        assert_eq!(
            TxFrame::new(&mac, &frags).validate(),
            Err(TxError::FragmentTooLarge)
        );

        let frags = [small, empty];
        assert_eq!(TxFrame::new(&mac, &frags).validate(), Err(TxError::EmptyFragment));

        let frags = [small; 8];
        assert_eq!(TxFrame::new(&mac, &frags).len(), 12 + 80);
    }
}
