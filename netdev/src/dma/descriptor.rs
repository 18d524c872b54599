//! SDMA hardware descriptor.
//!
//! # Layout
//! ```text
//! Offset  Field             Written by
//! 0x00    command/status    CPU (hands over), SDMA (hands back)
//! 0x04    byte count        see below
//! 0x08    buffer address    CPU, 32-bit bus address
//! 0x0C    next descriptor   CPU, 32-bit bus address
//! ```
//!
//! # Byte count
//! ```text
//! TX:  bits 16..29   bytes to send
//! RX:  bits 16..29   bytes received (SDMA), includes 4 CRC bytes
//!      bits  0..13   buffer size (CPU), stored in the byte-swapped word
//! ```
//!
//! # Ownership
//! Bit 31 of the command word says who owns the descriptor. Only the owner
//! touches the other fields. The CPU hands a descriptor over with
//! [`DescriptorSlot::publish`], which orders every prior field write before
//! the command word.

use core::ptr::{addr_of, addr_of_mut, NonNull};

use bitflags::bitflags;
use static_assertions::assert_eq_size;

use crate::hw::barriers::{rmb, wmb};

/// Size of one descriptor in bytes.
pub const DESC_SIZE: usize = 16;

/// Width mask of the 14-bit byte count fields.
pub const BYTE_COUNT_MASK: u32 = 0x3FFF;

/// Largest value a byte count field holds.
pub const MAX_BYTE_COUNT: usize = BYTE_COUNT_MASK as usize;

/// Descriptor as laid out in coherent memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwDescriptor {
    pub cmd_sts: u32,
    pub byte_count: u32,
    pub buffer_addr: u32,
    pub next_desc: u32,
}

assert_eq_size!(HwDescriptor, [u8; DESC_SIZE]);

bitflags! {
    /// RX command/status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxCmd: u32 {
        const OWN_SDMA = 1 << 31;
        /// Checksum not validated. Shares the bit with bus error.
        const CSUM_NONE = 1 << 30;
        const EN_INTR = 1 << 29;
        const RES_ERR = 1 << 28;
        const FIRST = 1 << 27;
        const LAST = 1 << 26;
    }
}

bitflags! {
    /// TX command/status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxCmd: u32 {
        const OWN_SDMA = 1 << 31;
        const FIRST = 1 << 21;
        const LAST = 1 << 20;
        const CRC = 1 << 12;
    }
}

/// Owner of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Cpu,
    Sdma,
}

impl Owner {
    /// Decode the ownership bit of a command word.
    #[inline]
    pub fn of(cmd: u32) -> Self {
        if cmd & (1 << 31) != 0 {
            Self::Sdma
        } else {
            Self::Cpu
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BYTE COUNT ACCESSORS
// ═══════════════════════════════════════════════════════════════════════════

/// Set the TX length (bits 16..29), keeping the other bits.
#[inline]
pub const fn tx_set_byte_count(bc: u32, len: u32) -> u32 {
    (bc & !(BYTE_COUNT_MASK << 16)) | ((len & BYTE_COUNT_MASK) << 16)
}

/// TX length stored in a byte count word.
#[inline]
pub const fn tx_byte_count(bc: u32) -> u32 {
    (bc >> 16) & BYTE_COUNT_MASK
}

/// Set the RX buffer size: low 14 bits of the byte-swapped word.
#[inline]
pub const fn rx_set_buffer_size(bc: u32, size: u32) -> u32 {
    let swapped = bc.swap_bytes();
    ((swapped & !BYTE_COUNT_MASK) | (size & BYTE_COUNT_MASK)).swap_bytes()
}

/// RX buffer size stored in a byte count word.
#[inline]
pub const fn rx_buffer_size(bc: u32) -> u32 {
    bc.swap_bytes() & BYTE_COUNT_MASK
}

/// Bytes the SDMA wrote into the buffer, CRC included.
#[inline]
pub const fn rx_received_len(bc: u32) -> u32 {
    (bc >> 16) & BYTE_COUNT_MASK
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR SLOT
// ═══════════════════════════════════════════════════════════════════════════

/// Handle to one descriptor in coherent memory.
///
/// All field accesses are volatile since the SDMA reads and writes the same
/// memory.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSlot {
    ptr: NonNull<HwDescriptor>,
    bus: u32,
}

// SAFETY: the slot only points into the coherent arena, whose accesses are
// serialized by the ring's owner.
unsafe impl Send for DescriptorSlot {}

impl DescriptorSlot {
    /// # Safety
    /// `ptr` must point to a descriptor inside live coherent memory whose
    /// device address is `bus`.
    pub unsafe fn new(ptr: NonNull<HwDescriptor>, bus: u32) -> Self {
        Self { ptr, bus }
    }

    /// Device-visible address of this descriptor.
    #[inline]
    pub fn bus_addr(&self) -> u32 {
        self.bus
    }

    #[inline]
    pub fn cmd(&self) -> u32 {
        // SAFETY: ptr is valid per `new`.
        unsafe { addr_of!((*self.ptr.as_ptr()).cmd_sts).read_volatile() }
    }

    /// Current owner. Field reads that follow are ordered after this read.
    #[inline]
    pub fn owner(&self) -> Owner {
        let owner = Owner::of(self.cmd());
        rmb();
        owner
    }

    #[inline]
    pub fn byte_count(&self) -> u32 {
        unsafe { addr_of!((*self.ptr.as_ptr()).byte_count).read_volatile() }
    }

    #[inline]
    pub fn buffer_addr(&self) -> u32 {
        unsafe { addr_of!((*self.ptr.as_ptr()).buffer_addr).read_volatile() }
    }

    #[inline]
    pub fn next_desc(&self) -> u32 {
        unsafe { addr_of!((*self.ptr.as_ptr()).next_desc).read_volatile() }
    }

    /// Write the command word without ordering. Only for descriptors the
    /// SDMA cannot reach yet.
    #[inline]
    pub fn set_cmd(&self, cmd: u32) {
        unsafe { addr_of_mut!((*self.ptr.as_ptr()).cmd_sts).write_volatile(cmd) }
    }

    #[inline]
    pub fn set_byte_count(&self, bc: u32) {
        unsafe { addr_of_mut!((*self.ptr.as_ptr()).byte_count).write_volatile(bc) }
    }

    #[inline]
    pub fn set_buffer_addr(&self, addr: u32) {
        unsafe { addr_of_mut!((*self.ptr.as_ptr()).buffer_addr).write_volatile(addr) }
    }

    #[inline]
    pub fn set_next_desc(&self, addr: u32) {
        unsafe { addr_of_mut!((*self.ptr.as_ptr()).next_desc).write_volatile(addr) }
    }

    /// Hand the descriptor over with command word `cmd`.
    ///
    /// Every earlier write to this or any other descriptor becomes visible
    /// before the command word does.
    #[inline]
    pub fn publish(&self, cmd: u32) {
        wmb();
        self.set_cmd(cmd);
    }

    /// Copy of all four fields.
    pub fn snapshot(&self) -> HwDescriptor {
        HwDescriptor {
            cmd_sts: self.cmd(),
            byte_count: self.byte_count(),
            buffer_addr: self.buffer_addr(),
            next_desc: self.next_desc(),
        }
    }
}
