//! RX pipeline.
//!
//! Each enabled hardware queue owns one ring with one streaming buffer per
//! descriptor. The poll routine walks the rings round-robin, taking at most
//! the queue's weight per visit, until the budget is spent or the rings stay
//! empty for [`MAX_EMPTY_POLLS`] visits in a row.
//!
//! # Frame layout in the buffer
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────────────┬──────┐
//! │ DA (6)   │ SA (6)   │ tag (16)     │ payload     │ CRC  │
//! └──────────┴──────────┴──────────────┴─────────────┴──────┘
//!  kept       kept       stripped       kept          stripped
//! ```

use dma_pool::{CoherentArena, DmaDirection, DmaError, DmaRegion};

use super::traits::PollScheduler;
use crate::dma::descriptor::{rx_received_len, rx_set_buffer_size};
use crate::dma::{DescriptorRing, Owner, RxCmd, SharedDmaPlatform, DESC_SIZE};
use crate::error::{Result, SdmaError};
use crate::hw::mg_window::streaming_windows;
use crate::hw::regs::NUM_RX_QUEUES;
use crate::hw::{DeviceVariant, MgWindows, QueueKind, Registers, WindowSpan};
use crate::stack::{Checksum, Delivery, HostStack, RxPacket};
use crate::stats::{DriverStats, InterfaceStats, Stat};

/// Destination and source MAC addresses.
pub const MAC_HEADER_LEN: usize = 12;
/// Switch tag between the MAC addresses and the EtherType.
pub const RX_TAG_SIZE: usize = 16;
pub const CRC_SIZE: usize = 4;
/// Shortest completion that still carries a frame.
pub const MIN_RX_LEN: usize = MAC_HEADER_LEN + RX_TAG_SIZE + CRC_SIZE;
/// Consecutive empty queue visits that end a poll.
pub const MAX_EMPTY_POLLS: u32 = 20;
pub const MAX_RX_RING_SIZE: usize = 2048;

/// Weight of hardware queue `queue` in a packed weight word.
#[inline]
pub fn queue_weight(weights: u32, queue: u8) -> usize {
    ((weights >> (4 * u32::from(queue))) & 0xF) as usize
}

/// Hardware queues of `mask` in ring order.
pub fn ring_order(mask: u8) -> impl Iterator<Item = u8> {
    (0..NUM_RX_QUEUES as u8).rev().filter(move |q| mask & (1 << q) != 0)
}

/// Coherent bytes one RX ring carves from the arena.
#[inline]
pub const fn ring_bytes(ring_size: usize) -> usize {
    ring_size * DESC_SIZE
}

// ═══════════════════════════════════════════════════════════════════════════
// RX RING
// ═══════════════════════════════════════════════════════════════════════════

/// Descriptor ring of one hardware RX queue plus its buffers.
pub struct RxRing {
    queue: u8,
    ring: DescriptorRing,
    buffers: Vec<DmaRegion>,
    buf_size: usize,
    platform: SharedDmaPlatform,
}

impl RxRing {
    /// Build a ring of `size` descriptors, each owning a `buf_size` buffer
    /// handed to the SDMA.
    pub fn build(
        arena: &mut CoherentArena,
        platform: &SharedDmaPlatform,
        queue: u8,
        size: usize,
        buf_size: usize,
    ) -> Result<Self> {
        let ring = DescriptorRing::build(arena, size)?;
        let mut rx = Self {
            queue,
            ring,
            buffers: Vec::with_capacity(size),
            buf_size,
            platform: platform.clone(),
        };

        for i in 0..size {
            let region = platform.map_streaming(buf_size, DmaDirection::FromDevice)?;
            let bus = region.bus_addr32();
            // pushed first so Drop unmaps it even when the address is unusable
            rx.buffers.push(region);
            let bus = bus?;

            let slot = rx.ring.slot(i);
            slot.set_buffer_addr(bus);
            slot.set_byte_count(rx_set_buffer_size(0, buf_size as u32));
            slot.set_cmd((RxCmd::OWN_SDMA | RxCmd::EN_INTR).bits());
        }

        Ok(rx)
    }

    /// Hardware queue this ring serves.
    pub fn queue(&self) -> u8 {
        self.queue
    }

    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    /// Lowest and highest buffer bus address.
    pub fn buffer_span(&self) -> Option<(u64, u64)> {
        let min = self.buffers.iter().map(DmaRegion::bus_addr).min()?;
        let max = self.buffers.iter().map(DmaRegion::bus_addr).max()?;
        Some((min, max))
    }

    /// Process up to `quota` completed descriptors.
    fn process(&mut self, ctx: &RxContext<'_>, quota: usize) -> usize {
        let mut done = 0;

        while done < quota {
            let slot = *self.ring.current();
            if slot.owner() == Owner::Sdma {
                break;
            }

            let cmd = RxCmd::from_bits_retain(slot.cmd());
            let bc = slot.byte_count();
            let region = &self.buffers[self.ring.buf_cursor()];

            self.platform
                .sync_for_cpu(region, self.buf_size, DmaDirection::FromDevice);

            match self.extract(cmd, bc, region) {
                Some(packet) => {
                    let len = packet.len();
                    match ctx.host.deliver(packet) {
                        Delivery::Accepted => ctx.if_stats.rx_ok(len),
                        Delivery::Dropped => ctx.if_stats.rx_drop(),
                    }
                }
                None => ctx.if_stats.rx_drop(),
            }

            self.platform
                .sync_for_device(region, self.buf_size, DmaDirection::FromDevice);
            slot.set_byte_count(rx_set_buffer_size(0, self.buf_size as u32));
            slot.publish((RxCmd::OWN_SDMA | RxCmd::EN_INTR).bits());

            self.ring.advance();
            done += 1;
        }

        done
    }

    /// Copy a completed frame out of its buffer without the tag and CRC.
    fn extract(&self, cmd: RxCmd, bc: u32, region: &DmaRegion) -> Option<RxPacket> {
        let len = rx_received_len(bc) as usize;

        if cmd.contains(RxCmd::RES_ERR) {
            log::debug!("rx queue {}: resource error", self.queue);
            return None;
        }
        if !(MIN_RX_LEN..=self.buf_size).contains(&len) {
            log::debug!("rx queue {}: bad length {}", self.queue, len);
            return None;
        }

        // SAFETY: the descriptor is CPU owned, so the SDMA is done with the
        // buffer until it is published again.
        let buf = unsafe { region.as_slice() };

        let mut data = Vec::with_capacity(len - RX_TAG_SIZE - CRC_SIZE);
        data.extend_from_slice(&buf[..MAC_HEADER_LEN]);
        data.extend_from_slice(&buf[MAC_HEADER_LEN + RX_TAG_SIZE..len - CRC_SIZE]);

        let checksum = if cmd.contains(RxCmd::CSUM_NONE) {
            Checksum::None
        } else {
            Checksum::Complete
        };

        Some(RxPacket {
            data,
            checksum,
            queue: self.queue,
        })
    }
}

impl Drop for RxRing {
    fn drop(&mut self) {
        for region in self.buffers.drain(..) {
            // SAFETY: the queue was pointed away from this ring before the
            // ring is dropped.
            unsafe {
                self.platform
                    .unmap_streaming(region, DmaDirection::FromDevice)
            };
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RX PATH
// ═══════════════════════════════════════════════════════════════════════════

/// Parameters for building the RX rings.
#[derive(Debug, Clone, Copy)]
pub struct RxSetup {
    pub variant: DeviceVariant,
    pub windows: MgWindows,
    /// Hardware RX queues to enable.
    pub mask: u8,
    pub ring_size: usize,
    pub buf_size: usize,
}

/// Collaborators the poll routine reports to.
pub(crate) struct RxContext<'a> {
    pub regs: &'a Registers,
    pub host: &'a dyn HostStack,
    pub scheduler: &'a dyn PollScheduler,
    pub stats: &'a DriverStats,
    pub if_stats: &'a InterfaceStats,
    pub weights: u32,
}

/// All RX rings of an open device.
pub struct RxPath {
    rings: Vec<RxRing>,
    /// Ring the next poll starts from.
    current: usize,
    mask: u8,
}

impl RxPath {
    /// Build the rings, open the streaming memory windows over their
    /// buffers and start the queues.
    pub fn setup(
        regs: &Registers,
        arena: &mut CoherentArena,
        platform: &SharedDmaPlatform,
        params: &RxSetup,
    ) -> Result<Self> {
        let Some(win1) = params.windows.streaming1 else {
            log::error!("streaming memory window is not set");
            return Err(SdmaError::MemoryWindowUnset("streaming"));
        };
        if params.mask == 0 {
            return Err(SdmaError::RxQueuesUnset);
        }

        let rings = ring_order(params.mask)
            .map(|q| RxRing::build(arena, platform, q, params.ring_size, params.buf_size))
            .collect::<Result<Vec<_>>>()?;

        let (min, max) = rings
            .iter()
            .filter_map(RxRing::buffer_span)
            .fold((u64::MAX, 0), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));

        let (first, second) = streaming_windows(min, max, params.buf_size as u64);
        if let Some(second) = second {
            let Some(win2) = params.windows.streaming2 else {
                log::error!("memory windows set with one window while two are needed");
                return Err(SdmaError::SecondWindowUnset);
            };
            Self::program_window(regs, params.variant, win2, second)?;
        }
        Self::program_window(regs, params.variant, win1, first)?;

        regs.enable_rx_boundaries();

        for ring in &rings {
            regs.write_rx_first_desc(ring.queue, ring.ring.base_bus());
            regs.enable_queue(QueueKind::Rx, ring.queue);
        }

        log::info!(
            "rx: {} queue(s) mask 0x{:02x}, {} x {} byte buffers",
            rings.len(),
            params.mask,
            params.ring_size,
            params.buf_size
        );

        Ok(Self {
            rings,
            current: 0,
            mask: params.mask,
        })
    }

    fn program_window(
        regs: &Registers,
        variant: DeviceVariant,
        win: u8,
        span: WindowSpan,
    ) -> Result<()> {
        let base = u32::try_from(span.base).map_err(|_| DmaError::AddressOutOfRange)?;
        let limit = u32::try_from(span.limit).map_err(|_| DmaError::AddressOutOfRange)?;
        regs.setup_mg_window(variant, win, base, limit);
        Ok(())
    }

    /// Detach every ring from its queue. Buffers are released on drop.
    pub fn teardown(&self, regs: &Registers) {
        for ring in &self.rings {
            regs.write_rx_first_desc(ring.queue, 0);
        }
    }

    /// Queue bitmap served by this path.
    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn rings(&self) -> &[RxRing] {
        &self.rings
    }

    /// Service the rings within `budget` packets.
    ///
    /// # Returns
    /// Number of descriptors consumed, never more than `budget`.
    ///
    /// # Contract
    /// - Completes polling and unmasks RX interrupts only when the rings
    ///   stayed empty for [`MAX_EMPTY_POLLS`] visits
    pub(crate) fn poll(&mut self, ctx: &RxContext<'_>, budget: usize) -> usize {
        ctx.stats.inc(Stat::PollCalls);

        let mut done_total = 0;
        let mut empty_polls = 0;

        while done_total < budget && empty_polls < MAX_EMPTY_POLLS {
            let ring = &mut self.rings[self.current];
            let quota = queue_weight(ctx.weights, ring.queue).min(budget - done_total);
            let done = ring.process(ctx, quota);

            if done == 0 {
                empty_polls += 1;
            } else {
                empty_polls = 0;
            }
            ctx.stats.add(Stat::RxQueue(ring.queue), done as u64);
            done_total += done;

            self.current = (self.current + 1) % self.rings.len();
        }

        if empty_polls >= MAX_EMPTY_POLLS {
            ctx.scheduler.complete();
            ctx.regs.enable_rx_interrupts(self.mask);
        } else {
            ctx.stats.inc(Stat::PollBurnBudget);
        }

        ctx.stats.add(Stat::RxPackets, done_total as u64);
        done_total
    }
}
