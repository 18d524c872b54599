//! Size-aligned coherent DMA arena.
//!
//! A device that reaches host memory through base/size windows needs every
//! DMA structure to live inside one block whose bus address is aligned to its
//! own size. This crate reserves such a block from a platform allocator and
//! hands out page-granular carve-outs from it with a bump pointer.
//!
//! # Design Philosophy
//!
//! - **Platform-agnostic**: all memory comes through the [`DmaPlatform`] trait
//! - **Monotonic**: carve-outs are never returned individually
//! - **Whole-arena release**: [`CoherentArena::free_all`] is the only way back
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{ArenaSizer, CoherentArena};
//!
//! let mut sizer = ArenaSizer::new();
//! sizer.add(ring_len * 16);
//! sizer.add(12);
//!
//! let mut arena = CoherentArena::reserve(&platform, sizer.arena_size())?;
//! let ring = arena.allocate(ring_len * 16)?;
//! let mac = arena.allocate(12)?;
//! // ...
//! unsafe { arena.free_all(&platform) };
//! ```

#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::ptr::NonNull;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Convert pages to bytes.
#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}

/// Convert bytes to pages (rounded up).
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

/// Size actually consumed by one arena carve-out of `size` bytes.
///
/// Every carve-out occupies at least one page and whole pages after that.
#[inline]
pub const fn carve_size(size: usize) -> usize {
    if size == 0 {
        PAGE_SIZE
    } else {
        align_up(size, PAGE_SIZE)
    }
}

// ============================================================================
// Error types
// ============================================================================

/// DMA allocation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Requested 0 bytes.
    ZeroSize,
    /// Platform or arena could not satisfy the request.
    OutOfMemory,
    /// Streaming mapping failed.
    MappingFailed,
    /// Bus address does not fit the device's addressing capability.
    AddressOutOfRange,
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized DMA allocation"),
            Self::OutOfMemory => write!(f, "out of DMA memory"),
            Self::MappingFailed => write!(f, "DMA mapping failed"),
            Self::AddressOutOfRange => write!(f, "bus address out of device range"),
        }
    }
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// DMA region
// ============================================================================

/// A block of host memory together with the address the device uses for it.
#[derive(Debug)]
pub struct DmaRegion {
    /// CPU-accessible pointer.
    cpu: NonNull<u8>,
    /// Device-visible bus address.
    bus: u64,
    /// Length in bytes.
    size: usize,
}

// SAFETY: a region is plain memory handed out once; access is serialized by
// the owner of the region.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Wrap a platform allocation.
    ///
    /// # Safety
    /// - `cpu` must point to `size` bytes valid for reads and writes
    /// - `bus` must be the address the device uses for the same bytes
    pub const unsafe fn new(cpu: NonNull<u8>, bus: u64, size: usize) -> Self {
        Self { cpu, bus, size }
    }

    /// CPU pointer to the first byte.
    #[inline]
    pub fn cpu_ptr(&self) -> *mut u8 {
        self.cpu.as_ptr()
    }

    /// Device-visible address of the first byte.
    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.bus
    }

    /// Length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bus address one past the last byte.
    #[inline]
    pub fn bus_end(&self) -> u64 {
        self.bus + self.size as u64
    }

    /// Check whether `bus` falls inside this region.
    #[inline]
    pub fn contains(&self, bus: u64) -> bool {
        bus >= self.bus && bus < self.bus_end()
    }

    /// Bus address as seen by a 32-bit DMA engine.
    pub fn bus_addr32(&self) -> Result<u32> {
        u32::try_from(self.bus).map_err(|_| DmaError::AddressOutOfRange)
    }

    /// Sub-region starting `offset` bytes in.
    ///
    /// # Safety
    /// The caller must not create overlapping sub-regions that are written
    /// concurrently.
    pub unsafe fn slice(&self, offset: usize, size: usize) -> Option<DmaRegion> {
        let end = offset.checked_add(size)?;
        if end > self.size {
            return None;
        }
        let cpu = NonNull::new(self.cpu.as_ptr().add(offset))?;
        Some(DmaRegion::new(cpu, self.bus + offset as u64, size))
    }

    /// View the region as bytes.
    ///
    /// # Safety
    /// The device must not be writing to the region.
    pub unsafe fn as_slice(&self) -> &[u8] {
        core::slice::from_raw_parts(self.cpu.as_ptr(), self.size)
    }

    /// View the region as mutable bytes.
    ///
    /// # Safety
    /// The device must not be accessing the region.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.cpu.as_ptr(), self.size)
    }
}

// ============================================================================
// Platform seam
// ============================================================================

/// Direction of a streaming mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Host writes, device reads.
    ToDevice,
    /// Device writes, host reads.
    FromDevice,
    /// Both.
    Bidirectional,
}

/// Host DMA services.
///
/// Implementations wrap whatever the platform offers: a kernel DMA API, an
/// IOMMU-backed user-space mapper, or a simulator in tests.
pub trait DmaPlatform {
    /// Allocate zeroed coherent memory.
    fn alloc_coherent(&self, size: usize) -> Result<DmaRegion>;

    /// Release coherent memory.
    ///
    /// # Safety
    /// `region` must come from `alloc_coherent` on the same platform and the
    /// device must no longer access it.
    unsafe fn free_coherent(&self, region: DmaRegion);

    /// Allocate a buffer and map it for streaming DMA.
    fn map_streaming(&self, size: usize, dir: DmaDirection) -> Result<DmaRegion>;

    /// Unmap and release a streaming buffer.
    ///
    /// # Safety
    /// `region` must come from `map_streaming` with the same direction.
    unsafe fn unmap_streaming(&self, region: DmaRegion, dir: DmaDirection);

    /// Make device writes visible to the CPU.
    fn sync_for_cpu(&self, _region: &DmaRegion, _len: usize, _dir: DmaDirection) {}

    /// Make CPU writes visible to the device.
    fn sync_for_device(&self, _region: &DmaRegion, _len: usize, _dir: DmaDirection) {}
}

// ============================================================================
// Arena sizing
// ============================================================================

/// Accumulates carve-out requests to size an arena up front.
///
/// Uses the same rounding as [`CoherentArena::allocate`], so an arena of
/// [`ArenaSizer::arena_size`] bytes always fits every recorded request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaSizer {
    total: usize,
}

impl ArenaSizer {
    /// Create an empty sizer.
    pub const fn new() -> Self {
        Self { total: 0 }
    }

    /// Record one carve-out of `size` bytes.
    pub fn add(&mut self, size: usize) -> &mut Self {
        self.total += carve_size(size);
        self
    }

    /// Bytes consumed by all recorded carve-outs.
    pub fn used(&self) -> usize {
        self.total
    }

    /// Arena size: the total rounded up to a power of two.
    pub fn arena_size(&self) -> usize {
        self.total.max(PAGE_SIZE).next_power_of_two()
    }
}

// ============================================================================
// Coherent arena
// ============================================================================

/// One size-aligned coherent block with a monotonic allocation mark.
#[derive(Debug)]
pub struct CoherentArena {
    region: DmaRegion,
    mark: usize,
}

impl CoherentArena {
    /// Reserve a block of `size` bytes (rounded to a power of two) whose bus
    /// address is aligned to its size.
    ///
    /// When the first allocation is misaligned it is released, a spacer that
    /// pads to the next aligned boundary is allocated, and the block is
    /// requested again. The spacer is released afterwards.
    pub fn reserve<P: DmaPlatform + ?Sized>(platform: &P, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DmaError::ZeroSize);
        }
        let size = size.max(PAGE_SIZE).next_power_of_two();

        let first = platform.alloc_coherent(size)?;
        let misalign = (first.bus_addr() % size as u64) as usize;
        if misalign == 0 {
            return Ok(Self::from_region(first));
        }

        // SAFETY: the device has never seen this block.
        unsafe { platform.free_coherent(first) };

        let spacer = platform.alloc_coherent(size - misalign)?;
        let second = platform.alloc_coherent(size);
        // SAFETY: the spacer only exists to shift the next allocation.
        unsafe { platform.free_coherent(spacer) };
        let second = second?;

        if second.bus_addr() & (size as u64 - 1) != 0 {
            // SAFETY: never handed to the device.
            unsafe { platform.free_coherent(second) };
            return Err(DmaError::OutOfMemory);
        }

        Ok(Self::from_region(second))
    }

    fn from_region(region: DmaRegion) -> Self {
        // SAFETY: freshly allocated, not yet shared with the device.
        unsafe { core::ptr::write_bytes(region.cpu_ptr(), 0, region.size()) };
        Self { region, mark: 0 }
    }

    /// Carve `size` bytes (at least one page) out of the arena.
    pub fn allocate(&mut self, size: usize) -> Result<DmaRegion> {
        let len = carve_size(size);
        let end = self.mark.checked_add(len).ok_or(DmaError::OutOfMemory)?;
        if end > self.region.size() {
            return Err(DmaError::OutOfMemory);
        }

        // SAFETY: [mark, end) is inside the arena and never handed out before.
        let carved = unsafe { self.region.slice(self.mark, len) }.ok_or(DmaError::OutOfMemory)?;
        self.mark = end;
        Ok(carved)
    }

    /// The whole arena.
    pub fn region(&self) -> &DmaRegion {
        &self.region
    }

    /// Bus address of the arena base.
    pub fn bus_base(&self) -> u64 {
        self.region.bus_addr()
    }

    /// Arena size in bytes.
    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.mark
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.region.size() - self.mark
    }

    /// Release the whole arena.
    ///
    /// # Safety
    /// No carve-out may be used by the CPU or the device afterwards.
    pub unsafe fn free_all<P: DmaPlatform + ?Sized>(self, platform: &P) {
        platform.free_coherent(self.region);
    }
}
