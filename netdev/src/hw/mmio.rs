//! MMIO access to PCI BARs.

use core::ptr::NonNull;

/// A memory-mapped register region addressed by byte offset.
pub trait MmioRegion: Send + Sync {
    /// Read a 32-bit register.
    fn read32(&self, offset: usize) -> u32;

    /// Write a 32-bit register.
    fn write32(&self, offset: usize, value: u32);

    /// Region length in bytes.
    fn len(&self) -> usize;
}

/// A BAR mapped into the CPU address space.
pub struct MappedBar {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: MMIO registers are accessed with single volatile operations.
unsafe impl Send for MappedBar {}
unsafe impl Sync for MappedBar {}

impl MappedBar {
    /// Wrap a mapped BAR.
    ///
    /// # Safety
    /// `base` must map `len` bytes of device memory for the lifetime of the
    /// returned value.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    fn reg(&self, offset: usize) -> Option<*mut u32> {
        if offset % 4 != 0 || offset.checked_add(4)? > self.len {
            return None;
        }
        // SAFETY: offset + 4 is inside the mapping.
        Some(unsafe { self.base.as_ptr().add(offset) } as *mut u32)
    }
}

impl MmioRegion for MappedBar {
    fn read32(&self, offset: usize) -> u32 {
        match self.reg(offset) {
            // SAFETY: bounds and alignment checked above.
            Some(p) => unsafe { p.read_volatile() },
            None => {
                log::warn!("MMIO read outside BAR: 0x{:x}", offset);
                u32::MAX
            }
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        match self.reg(offset) {
            // SAFETY: bounds and alignment checked above.
            Some(p) => unsafe { p.write_volatile(value) },
            None => log::warn!("MMIO write outside BAR: 0x{:x}", offset),
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}
