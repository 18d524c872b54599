//! Register access through the iATU window.
//!
//! Windowed devices expose only a 1MB slice of the switch address space in
//! BAR2 at a time. The slice is selected by pointing an inbound iATU window
//! (programmed through BAR0) at the block holding the register. Every access
//! compares the register's block with the cached one and retargets the window
//! on a miss.
//!
//! Flat devices map the switch registers straight into BAR2 and skip all of
//! this.
//!
//! ```text
//!   addr = 0x1D00_2680
//!          └─┬─┘└──┬──┘
//!   block ───┘     └─── offset inside BAR2 slice
//!   (target)
//! ```

use std::sync::Arc;

use spin::Mutex;

use super::mmio::MmioRegion;
use super::regs::{
    atu_inbound, ATU_CTRL1, ATU_CTRL2, ATU_CTRL2_ENABLE, ATU_LIMIT, ATU_START, ATU_TARGET,
    NUM_ATU_WINDOWS, WINDOW_BASE_MASK, WINDOW_OFFSET_MASK,
};

/// Inbound registers of one iATU window, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtuWindowRegs {
    pub index: u8,
    pub start: u32,
    pub limit: u32,
    pub target: u32,
}

struct WindowState {
    /// Selected iATU window, `None` on flat devices.
    atu_win: Option<u8>,
    /// Block currently targeted by the window.
    cached_base: Option<u32>,
    /// Offset of the selected window's slice inside BAR2.
    bar2_offset: usize,
    /// Number of times the window was retargeted.
    reprograms: u64,
}

/// Switch register file behind BAR0/BAR2.
///
/// The window cache and every BAR2 access sit under one lock, so a retarget
/// and the access that caused it are never split by another context.
pub struct Registers {
    bar0: Arc<dyn MmioRegion>,
    bar2: Arc<dyn MmioRegion>,
    state: Mutex<WindowState>,
}

impl Registers {
    pub fn new(bar0: Arc<dyn MmioRegion>, bar2: Arc<dyn MmioRegion>, atu_win: Option<u8>) -> Self {
        Self {
            bar0,
            bar2,
            state: Mutex::new(WindowState {
                atu_win,
                cached_base: None,
                bar2_offset: 0,
                reprograms: 0,
            }),
        }
    }

    /// Read a switch register.
    pub fn read(&self, addr: u32) -> u32 {
        let mut st = self.state.lock();
        let offset = self.translate(&mut st, addr);
        self.bar2.read32(offset)
    }

    /// Write a switch register.
    pub fn write(&self, addr: u32, value: u32) {
        let mut st = self.state.lock();
        let offset = self.translate(&mut st, addr);
        self.bar2.write32(offset, value);
    }

    /// Read-modify-write a switch register atomically with respect to other
    /// register users.
    pub fn modify(&self, addr: u32, f: impl FnOnce(u32) -> u32) {
        let mut st = self.state.lock();
        let offset = self.translate(&mut st, addr);
        let value = self.bar2.read32(offset);
        self.bar2.write32(offset, f(value));
    }

    /// OR `bits` into a register.
    #[inline]
    pub fn set_bits(&self, addr: u32, bits: u32) {
        self.modify(addr, |v| v | bits);
    }

    /// Clear `bits` in a register.
    #[inline]
    pub fn clear_bits(&self, addr: u32, bits: u32) {
        self.modify(addr, |v| v & !bits);
    }

    /// Selected iATU window.
    pub fn atu_window(&self) -> Option<u8> {
        self.state.lock().atu_win
    }

    /// Select another iATU window. The next access retargets it.
    pub fn set_atu_window(&self, win: Option<u8>) {
        let mut st = self.state.lock();
        st.atu_win = win;
        st.cached_base = None;
        st.bar2_offset = 0;
    }

    /// Block currently mapped, if any.
    pub fn cached_base(&self) -> Option<u32> {
        self.state.lock().cached_base
    }

    /// How many times the window has been retargeted.
    pub fn reprogram_count(&self) -> u64 {
        self.state.lock().reprograms
    }

    /// Snapshot of all inbound iATU windows.
    pub fn atu_windows(&self) -> [AtuWindowRegs; NUM_ATU_WINDOWS as usize] {
        let _st = self.state.lock();
        core::array::from_fn(|i| {
            let base = atu_inbound(i as u8);
            AtuWindowRegs {
                index: i as u8,
                start: self.bar0.read32(base + ATU_START),
                limit: self.bar0.read32(base + ATU_LIMIT),
                target: self.bar0.read32(base + ATU_TARGET),
            }
        })
    }

    /// Map `addr` to a BAR2 offset, retargeting the window if needed.
    fn translate(&self, st: &mut WindowState, addr: u32) -> usize {
        let offset = (addr & WINDOW_OFFSET_MASK) as usize;

        let Some(win) = st.atu_win else {
            return offset;
        };

        let block = addr & WINDOW_BASE_MASK;
        if st.cached_base != Some(block) {
            self.retarget(st, win, block);
        }

        st.bar2_offset + offset
    }

    fn retarget(&self, st: &mut WindowState, win: u8, block: u32) {
        let win0 = atu_inbound(0);
        let winx = atu_inbound(win);

        let win0_start = self.bar0.read32(win0 + ATU_START);
        let mut winx_start = self.bar0.read32(winx + ATU_START);

        if winx_start == 0 {
            let win_size = self.bar0.read32(win0 + ATU_LIMIT).wrapping_sub(win0_start);
            winx_start = win0_start.wrapping_add(u32::from(win).wrapping_mul(win_size.wrapping_add(1)));

            self.bar0.write32(winx + ATU_CTRL1, 0);
            self.bar0.write32(winx + ATU_CTRL2, ATU_CTRL2_ENABLE);
            self.bar0.write32(winx + ATU_START, winx_start);
            self.bar0.write32(winx + ATU_LIMIT, winx_start.wrapping_add(win_size));

            log::debug!(
                "iATU window {} enabled at 0x{:08x} (size 0x{:x})",
                win,
                winx_start,
                win_size.wrapping_add(1)
            );
        }

        self.bar0.write32(winx + ATU_TARGET, block);

        st.bar2_offset = winx_start.wrapping_sub(win0_start) as usize;
        st.cached_base = Some(block);
        st.reprograms += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeBar {
        regs: StdMutex<HashMap<usize, u32>>,
        writes: StdMutex<Vec<(usize, u32)>>,
    }

    impl MmioRegion for FakeBar {
        fn read32(&self, offset: usize) -> u32 {
            *self.regs.lock().unwrap().get(&offset).unwrap_or(&0)
        }
        fn write32(&self, offset: usize, value: u32) {
            self.regs.lock().unwrap().insert(offset, value);
            self.writes.lock().unwrap().push((offset, value));
        }
        fn len(&self) -> usize {
            0x0100_0000
        }
    }

    fn windowed(win: Option<u8>) -> (Arc<FakeBar>, Arc<FakeBar>, Registers) {
        let bar0 = Arc::new(FakeBar::default());
        let bar2 = Arc::new(FakeBar::default());
        bar0.write32(atu_inbound(0) + ATU_START, 0x1000_0000);
        bar0.write32(atu_inbound(0) + ATU_LIMIT, 0x100F_FFFF);
        bar0.writes.lock().unwrap().clear();
        let regs = Registers::new(bar0.clone(), bar2.clone(), win);
        (bar0, bar2, regs)
    }

    #[test]
    fn test_first_access_programs_window() {
        let (bar0, bar2, regs) = windowed(Some(5));
        regs.write(0x1D00_2680, 0xAB);

        let winx = atu_inbound(5);
        assert_eq!(bar0.read32(winx + ATU_CTRL2), ATU_CTRL2_ENABLE);
        assert_eq!(bar0.read32(winx + ATU_START), 0x1050_0000);
        assert_eq!(bar0.read32(winx + ATU_LIMIT), 0x105F_FFFF);
        assert_eq!(bar0.read32(winx + ATU_TARGET), 0x1D00_0000);
        assert_eq!(bar2.read32(0x50_0000 + 0x2680), 0xAB);
        assert_eq!(regs.cached_base(), Some(0x1D00_0000));
    }

    #[test]
    fn test_same_block_does_not_retarget() {
        let (bar0, _bar2, regs) = windowed(Some(5));
        regs.read(0x1D00_0000);
        let writes = bar0.writes.lock().unwrap().len();
        regs.read(0x1D0F_FFFC);
        regs.write(0x1D00_2814, 1);
        assert_eq!(bar0.writes.lock().unwrap().len(), writes);
        assert_eq!(regs.reprogram_count(), 1);
    }

    #[test]
    fn test_block_edge_retargets() {
        let (bar0, _bar2, regs) = windowed(Some(2));
        regs.read(0x1D0F_FFFC);
        regs.read(0x1D10_0000);
        assert_eq!(regs.reprogram_count(), 2);
        assert_eq!(bar0.read32(atu_inbound(2) + ATU_TARGET), 0x1D10_0000);
        regs.read(0x1D0F_FFFC);
        assert_eq!(regs.reprogram_count(), 3);
    }

    #[test]
    fn test_programmed_window_is_reused() {
        let (bar0, _bar2, regs) = windowed(Some(3));
        bar0.write32(atu_inbound(3) + ATU_START, 0x1030_0000);
        bar0.writes.lock().unwrap().clear();
        regs.read(0x1D00_0050);
        // only the target is written
        assert_eq!(
            *bar0.writes.lock().unwrap(),
            vec![(atu_inbound(3) + ATU_TARGET, 0x1D00_0000)]
        );
    }

    #[test]
    fn test_flat_device_skips_translation() {
        let (bar0, bar2, regs) = windowed(None);
        regs.write(0x1D00_2680, 7);
        assert!(bar0.writes.lock().unwrap().is_empty());
        assert_eq!(bar2.read32(0x2680), 7);
        assert_eq!(regs.reprogram_count(), 0);
    }

    #[test]
    fn test_changing_window_invalidates_cache() {
        let (_bar0, _bar2, regs) = windowed(Some(5));
        regs.read(0x1D00_0000);
        regs.set_atu_window(Some(6));
        assert_eq!(regs.cached_base(), None);
        regs.read(0x1D00_0000);
        assert_eq!(regs.reprogram_count(), 2);
    }

    #[test]
    fn test_modify_and_bit_helpers() {
        let (_bar0, bar2, regs) = windowed(None);
        regs.write(0x1D00_2814, 0b1010);
        regs.set_bits(0x1D00_2814, 0b0101);
        assert_eq!(bar2.read32(0x2814), 0b1111);
        regs.clear_bits(0x1D00_2814, 0b0011);
        assert_eq!(regs.read(0x1D00_2814), 0b1100);
    }
}
