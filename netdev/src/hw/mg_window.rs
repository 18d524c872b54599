//! Memory (MG) windows.
//!
//! The SDMA only reaches host memory that falls inside one of its memory
//! windows. The driver uses up to three: one covering the coherent arena and
//! one or two covering the streaming RX buffers.

use super::regs::{
    MG_BASE_ADDR, MG_BASE_ADDR_STRIDE, MG_CONTROL, MG_CONTROL_STRIDE, MG_HA, MG_HA_STRIDE,
    MG_SIZE, MG_SIZE_STRIDE, NUM_MG_WINDOWS,
};
use super::variant::DeviceVariant;
use super::window::Registers;

/// Default window mask: windows 1, 2 and 3.
pub const DEFAULT_MG_WIN_MASK: u8 = 0xE;

/// Windows assigned to the driver, in assignment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MgWindows {
    pub coherent: Option<u8>,
    pub streaming1: Option<u8>,
    pub streaming2: Option<u8>,
}

impl MgWindows {
    /// Assign windows from a bitmask, lowest set bit first.
    pub fn from_mask(mask: u8) -> Self {
        let mut wins = (0..NUM_MG_WINDOWS).filter(|w| mask & (1 << w) != 0);
        Self {
            coherent: wins.next(),
            streaming1: wins.next(),
            streaming2: wins.next(),
        }
    }

    /// Bitmask of the assigned windows.
    pub fn mask(&self) -> u8 {
        self.iter().fold(0, |m, w| m | (1 << w))
    }

    pub fn contains(&self, win: u8) -> bool {
        self.iter().any(|w| w == win)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> {
        [self.coherent, self.streaming1, self.streaming2]
            .into_iter()
            .flatten()
    }
}

/// A window span as programmed: base and `size - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpan {
    pub base: u64,
    pub limit: u64,
}

impl WindowSpan {
    /// Span covering `[start, end)`.
    pub fn covering(start: u64, end: u64) -> Self {
        Self {
            base: start,
            limit: end - start - 1,
        }
    }
}

/// Windows covering streaming buffers whose bus addresses lie in
/// `[min_addr, max_addr]`, each `buf_size` long.
///
/// The span is split in two when its base is not a multiple of its length:
/// the first window starts at the aligned address below `min_addr`, the
/// second follows it.
pub fn streaming_windows(min_addr: u64, max_addr: u64, buf_size: u64) -> (WindowSpan, Option<WindowSpan>) {
    let end = max_addr + buf_size;
    let span = end - min_addr;
    let skew = min_addr % span;

    if skew == 0 {
        return (WindowSpan::covering(min_addr, end), None);
    }

    let first_start = min_addr - skew;
    let first_end = end - skew;
    (
        WindowSpan::covering(first_start, first_end),
        Some(WindowSpan::covering(first_end, first_end + span)),
    )
}

/// Raw registers of one memory window, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MgWindowRegs {
    pub index: u8,
    pub base: u32,
    pub size: u32,
    pub high_addr: u32,
    pub control: u32,
}

impl Registers {
    /// Program memory window `win`. A zero `base` clears it.
    pub fn setup_mg_window(&self, variant: DeviceVariant, win: u8, base: u32, size: u32) {
        let (target, control) = if base == 0 {
            (0, 0)
        } else {
            (variant.mg_target(), variant.mg_control(base))
        };

        let w = u32::from(win);
        self.write(MG_BASE_ADDR + w * MG_BASE_ADDR_STRIDE, base | target);
        self.write(MG_SIZE + w * MG_SIZE_STRIDE, size);
        self.write(MG_HA + w * MG_HA_STRIDE, 0);
        self.write(MG_CONTROL + w * MG_CONTROL_STRIDE, control);

        log::debug!("MG window {}: base 0x{:08x} size 0x{:x}", win, base, size);
    }

    pub fn clear_mg_window(&self, variant: DeviceVariant, win: u8) {
        self.setup_mg_window(variant, win, 0, 0);
    }

    pub fn mg_window(&self, win: u8) -> MgWindowRegs {
        let w = u32::from(win);
        MgWindowRegs {
            index: win,
            base: self.read(MG_BASE_ADDR + w * MG_BASE_ADDR_STRIDE),
            size: self.read(MG_SIZE + w * MG_SIZE_STRIDE),
            high_addr: self.read(MG_HA + w * MG_HA_STRIDE),
            control: self.read(MG_CONTROL + w * MG_CONTROL_STRIDE),
        }
    }
}
