//! Simulated switch for integration tests.
//!
//! - `SimMemory`: host memory with fixed bus addresses
//! - `SimDma`: `DmaPlatform` over `SimMemory`
//! - `SimBar0`: iATU register block
//! - `SimSwitch`: BAR2 with a register file and a minimal SDMA engine
//! - `SimInterrupts`, `SimHost`, `SimClock`: the remaining platform seams

#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dma_pool::{align_up, DmaDirection, DmaError, DmaPlatform, DmaRegion, PAGE_SIZE};
use sdma_netdev::dma::descriptor::{rx_buffer_size, tx_byte_count};
use sdma_netdev::dma::{HwDescriptor, RxCmd, TxCmd};
use sdma_netdev::driver::{InterruptSource, PollState, WakeSignal};
use sdma_netdev::hw::regs::*;
use sdma_netdev::hw::variant::{PCI_DEVICE_ID_ALDRIN2, PCI_DEVICE_ID_FALCON, PCI_VENDOR_ID_MARVELL};
use sdma_netdev::hw::{DeviceVariant, MmioRegion};
use sdma_netdev::time::Clock;
use sdma_netdev::{DeviceResources, Delivery, HostStack, RxPacket, SdmaDevice, SdmaError};

pub const COHERENT_BASE: u64 = 0x4000_0000;
/// Deliberately one page past an aligned boundary.
pub const STREAMING_BASE: u64 = 0x5000_1000;
const POOL_SIZE: usize = 8 << 20;

/// BAR0 window 0 as firmware leaves it: 1MB at 0x1000_0000.
pub const WIN0_START: u32 = 0x1000_0000;
pub const WIN_SIZE: u32 = 0x0010_0000;

pub const TEST_RING_SIZE: usize = 16;
pub const TEST_PKT_SZ: usize = 2048;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY
// ═══════════════════════════════════════════════════════════════════════════

struct Pool {
    bus: u64,
    offset: usize,
    top: usize,
}

pub struct SimMemory {
    base: NonNull<u8>,
    len: usize,
    pools: Mutex<[Pool; 2]>,
}

unsafe impl Send for SimMemory {}
unsafe impl Sync for SimMemory {}

impl SimMemory {
    pub fn new() -> Self {
        let len = 2 * POOL_SIZE;
        let mem: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let base = NonNull::new(Box::into_raw(mem) as *mut u8).unwrap();
        Self {
            base,
            len,
            pools: Mutex::new([
                Pool {
                    bus: COHERENT_BASE,
                    offset: 0,
                    top: 0,
                },
                Pool {
                    bus: STREAMING_BASE,
                    offset: POOL_SIZE,
                    top: 0,
                },
            ]),
        }
    }

    fn alloc(&self, pool: usize, size: usize, align: usize) -> Result<DmaRegion, DmaError> {
        let mut pools = self.pools.lock().unwrap();
        let p = &mut pools[pool];
        let start = align_up(p.top, align);
        let len = align_up(size, PAGE_SIZE);
        if start + len > POOL_SIZE {
            return Err(DmaError::OutOfMemory);
        }
        p.top = start + len;
        let cpu = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(p.offset + start)) };
        Ok(unsafe { DmaRegion::new(cpu, p.bus + start as u64, size) })
    }

    fn ptr(&self, bus: u32, len: usize) -> *mut u8 {
        let bus = u64::from(bus);
        let offset = if (COHERENT_BASE..COHERENT_BASE + POOL_SIZE as u64).contains(&bus) {
            (bus - COHERENT_BASE) as usize
        } else if (STREAMING_BASE..STREAMING_BASE + POOL_SIZE as u64).contains(&bus) {
            POOL_SIZE + (bus - STREAMING_BASE) as usize
        } else {
            panic!("bus address 0x{:x} outside simulated memory", bus);
        };
        assert!(offset + len <= self.len);
        unsafe { self.base.as_ptr().add(offset) }
    }

    pub fn read_desc(&self, bus: u32) -> HwDescriptor {
        unsafe { (self.ptr(bus, 16) as *const HwDescriptor).read_volatile() }
    }

    pub fn write_word(&self, bus: u32, value: u32) {
        unsafe { (self.ptr(bus, 4) as *mut u32).write_volatile(value) }
    }

    pub fn read_bytes(&self, bus: u32, len: usize) -> Vec<u8> {
        let p = self.ptr(bus, len);
        unsafe { std::slice::from_raw_parts(p, len).to_vec() }
    }

    pub fn write_bytes(&self, bus: u32, data: &[u8]) {
        let p = self.ptr(bus, data.len());
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), p, data.len()) }
    }

    /// Descriptors of a ring of `len` slots starting at `base`.
    pub fn ring(&self, base: u32, len: usize) -> Vec<HwDescriptor> {
        (0..len).map(|i| self.read_desc(base + 16 * i as u32)).collect()
    }
}

impl Drop for SimMemory {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// DMA platform over [`SimMemory`] that tracks live allocations.
pub struct SimDma {
    mem: Arc<SimMemory>,
    pub coherent_live: AtomicUsize,
    pub streaming_live: AtomicUsize,
    pub fail_streaming: AtomicBool,
}

impl SimDma {
    pub fn new(mem: Arc<SimMemory>) -> Self {
        Self {
            mem,
            coherent_live: AtomicUsize::new(0),
            streaming_live: AtomicUsize::new(0),
            fail_streaming: AtomicBool::new(false),
        }
    }
}

impl DmaPlatform for SimDma {
    fn alloc_coherent(&self, size: usize) -> Result<DmaRegion, DmaError> {
        let region = self.mem.alloc(0, size, size.next_power_of_two().max(PAGE_SIZE))?;
        self.coherent_live.fetch_add(1, Ordering::SeqCst);
        Ok(region)
    }

    unsafe fn free_coherent(&self, _region: DmaRegion) {
        self.coherent_live.fetch_sub(1, Ordering::SeqCst);
    }

    fn map_streaming(&self, size: usize, _dir: DmaDirection) -> Result<DmaRegion, DmaError> {
        if self.fail_streaming.load(Ordering::SeqCst) {
            return Err(DmaError::MappingFailed);
        }
        let region = self.mem.alloc(1, size, PAGE_SIZE)?;
        self.streaming_live.fetch_add(1, Ordering::SeqCst);
        Ok(region)
    }

    unsafe fn unmap_streaming(&self, _region: DmaRegion, _dir: DmaDirection) {
        self.streaming_live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BARS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct SimBar0 {
    regs: Mutex<HashMap<usize, u32>>,
}

impl SimBar0 {
    pub fn new() -> Self {
        let bar = Self::default();
        bar.write32(atu_inbound(0) + ATU_START, WIN0_START);
        bar.write32(atu_inbound(0) + ATU_LIMIT, WIN0_START + WIN_SIZE - 1);
        bar
    }

    pub fn get(&self, offset: usize) -> u32 {
        *self.regs.lock().unwrap().get(&offset).unwrap_or(&0)
    }
}

impl MmioRegion for SimBar0 {
    fn read32(&self, offset: usize) -> u32 {
        self.get(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.regs.lock().unwrap().insert(offset, value);
    }

    fn len(&self) -> usize {
        0x4000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Take every chain as soon as the queue is started.
    Complete,
    /// Never take a chain.
    Stall,
}

/// A chain the simulated SDMA took.
#[derive(Debug, Clone)]
pub struct TxChain {
    pub queue: u8,
    pub descs: Vec<HwDescriptor>,
    /// Bytes of every segment, in chain order.
    pub wire: Vec<u8>,
}

struct SwitchState {
    regs: HashMap<u32, u32>,
    rx_enabled: u8,
    tx_enabled: u8,
    rx_current: [u32; NUM_RX_QUEUES],
    tx_mode: TxMode,
    tx_log: Vec<TxChain>,
}

/// BAR2 of the switch.
pub struct SimSwitch {
    variant: DeviceVariant,
    bar0: Arc<SimBar0>,
    mem: Arc<SimMemory>,
    state: Mutex<SwitchState>,
}

/// Apply a queue command write, returning the queues whose enable bit was
/// written.
fn apply_queue_cmd(enabled: &mut u8, value: u32) -> u8 {
    let mut started = 0;
    for q in 0..8u8 {
        if value & queue_disable_bit(q) != 0 {
            *enabled &= !(1 << q);
        } else if value & queue_enable_bit(q) != 0 {
            *enabled |= 1 << q;
            started |= 1 << q;
        }
    }
    started
}

impl SimSwitch {
    fn new(variant: DeviceVariant, bar0: Arc<SimBar0>, mem: Arc<SimMemory>) -> Self {
        let mut regs = HashMap::new();
        regs.insert(VENDOR_ID, u32::from(PCI_VENDOR_ID_MARVELL));
        regs.insert(
            DEVICE_ID,
            u32::from(match variant {
                DeviceVariant::Windowed => PCI_DEVICE_ID_FALCON,
                DeviceVariant::Flat => PCI_DEVICE_ID_ALDRIN2,
            }),
        );
        Self {
            variant,
            bar0,
            mem,
            state: Mutex::new(SwitchState {
                regs,
                rx_enabled: 0,
                tx_enabled: 0,
                rx_current: [0; NUM_RX_QUEUES],
                tx_mode: TxMode::Complete,
                tx_log: Vec::new(),
            }),
        }
    }

    /// Switch address behind a BAR2 offset.
    fn decode(&self, offset: usize) -> u32 {
        let in_window = offset as u32 & WINDOW_OFFSET_MASK;
        match self.variant {
            DeviceVariant::Flat => REG_BASE | in_window,
            DeviceVariant::Windowed => {
                let slice = offset as u32 & !WINDOW_OFFSET_MASK;
                for w in 0..NUM_ATU_WINDOWS {
                    let start = self.bar0.get(atu_inbound(w) + ATU_START);
                    if start != 0 && start.wrapping_sub(WIN0_START) == slice {
                        return self.bar0.get(atu_inbound(w) + ATU_TARGET) | in_window;
                    }
                }
                panic!("BAR2 offset 0x{:x} is not behind any iATU window", offset);
            }
        }
    }

    /// Raw register value, without access side effects.
    pub fn reg(&self, addr: u32) -> u32 {
        let st = self.state.lock().unwrap();
        match addr {
            RX_QUEUE_CMD => u32::from(st.rx_enabled),
            TX_QUEUE_CMD => u32::from(st.tx_enabled),
            _ => *st.regs.get(&addr).unwrap_or(&0),
        }
    }

    pub fn set_reg(&self, addr: u32, value: u32) {
        self.state.lock().unwrap().regs.insert(addr, value);
    }

    pub fn set_tx_mode(&self, mode: TxMode) {
        self.state.lock().unwrap().tx_mode = mode;
    }

    pub fn tx_log(&self) -> Vec<TxChain> {
        self.state.lock().unwrap().tx_log.clone()
    }

    pub fn rx_enabled(&self) -> u8 {
        self.state.lock().unwrap().rx_enabled
    }

    /// Receive `frame` on `queue` like the SDMA would.
    ///
    /// Returns `false` when the queue is stopped or its next descriptor is
    /// still owned by the CPU.
    pub fn inject_rx(&self, queue: u8, frame: &[u8], extra: RxCmd) -> bool {
        let mut st = self.state.lock().unwrap();
        let cur = st.rx_current[queue as usize];
        if cur == 0 || st.rx_enabled & (1 << queue) == 0 {
            return false;
        }

        let d = self.mem.read_desc(cur);
        if d.cmd_sts & RxCmd::OWN_SDMA.bits() == 0 {
            return false;
        }

        let capacity = rx_buffer_size(d.byte_count) as usize;
        self.mem
            .write_bytes(d.buffer_addr, &frame[..frame.len().min(capacity)]);
        self.mem.write_word(cur + 4, (frame.len() as u32) << 16);
        self.mem
            .write_word(cur, (RxCmd::FIRST | RxCmd::LAST | extra).bits());

        st.rx_current[queue as usize] = d.next_desc;
        true
    }

    fn process_tx(&self, st: &mut SwitchState, queue: u8) {
        if st.tx_mode == TxMode::Stall {
            return;
        }

        let mut cur = *st.regs.get(&tx_first_desc(queue)).unwrap_or(&0);
        let mut chain = TxChain {
            queue,
            descs: Vec::new(),
            wire: Vec::new(),
        };

        for _ in 0..32 {
            if cur == 0 {
                break;
            }
            let d = self.mem.read_desc(cur);
            if d.cmd_sts & TxCmd::OWN_SDMA.bits() == 0 {
                break;
            }
            chain.descs.push(d);
            chain
                .wire
                .extend(self.mem.read_bytes(d.buffer_addr, tx_byte_count(d.byte_count) as usize));
            self.mem
                .write_word(cur, d.cmd_sts & !TxCmd::OWN_SDMA.bits());
            if d.cmd_sts & TxCmd::LAST.bits() != 0 {
                break;
            }
            cur = d.next_desc;
        }

        // the queue stops at the end of the chain
        st.tx_enabled &= !(1 << queue);
        if !chain.descs.is_empty() {
            st.tx_log.push(chain);
        }
    }
}

impl MmioRegion for SimSwitch {
    fn read32(&self, offset: usize) -> u32 {
        let addr = self.decode(offset);
        let mut st = self.state.lock().unwrap();
        match addr {
            RX_QUEUE_CMD => u32::from(st.rx_enabled),
            TX_QUEUE_CMD => u32::from(st.tx_enabled),
            // read to clear
            CAUSE_0 => st.regs.remove(&CAUSE_0).unwrap_or(0),
            _ => *st.regs.get(&addr).unwrap_or(&0),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let addr = self.decode(offset);
        let mut st = self.state.lock().unwrap();
        match addr {
            RX_QUEUE_CMD => {
                apply_queue_cmd(&mut st.rx_enabled, value);
            }
            TX_QUEUE_CMD => {
                let started = apply_queue_cmd(&mut st.tx_enabled, value);
                for q in 0..8u8 {
                    if started & (1 << q) != 0 {
                        self.process_tx(&mut st, q);
                    }
                }
            }
            _ => {
                for q in 0..NUM_RX_QUEUES as u8 {
                    if addr == rx_first_desc(q) {
                        st.rx_current[q as usize] = value;
                    }
                }
                st.regs.insert(addr, value);
            }
        }
    }

    fn len(&self) -> usize {
        (NUM_ATU_WINDOWS as usize) * WIN_SIZE as usize
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLATFORM SEAMS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct SimInterrupts {
    wake: Mutex<Option<Arc<WakeSignal>>>,
    pub fail_register: AtomicBool,
}

impl SimInterrupts {
    pub fn is_registered(&self) -> bool {
        self.wake.lock().unwrap().is_some()
    }

    /// Post the registered wake signal. Returns `false` if none.
    pub fn fire(&self) -> bool {
        match self.wake.lock().unwrap().as_ref() {
            Some(w) => {
                w.post();
                true
            }
            None => false,
        }
    }
}

impl InterruptSource for SimInterrupts {
    fn register(&self, wake: Arc<WakeSignal>) -> sdma_netdev::Result<()> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(SdmaError::IrqRegistration);
        }
        *self.wake.lock().unwrap() = Some(wake);
        Ok(())
    }

    fn unregister(&self, wake: &Arc<WakeSignal>) {
        let mut slot = self.wake.lock().unwrap();
        if slot.as_ref().map_or(false, |w| Arc::ptr_eq(w, wake)) {
            *slot = None;
        }
    }
}

#[derive(Default)]
pub struct SimHost {
    packets: Mutex<Vec<RxPacket>>,
    pub reject: AtomicBool,
}

impl SimHost {
    pub fn take(&self) -> Vec<RxPacket> {
        std::mem::take(&mut *self.packets.lock().unwrap())
    }
}

impl HostStack for SimHost {
    fn deliver(&self, packet: RxPacket) -> Delivery {
        if self.reject.load(Ordering::SeqCst) {
            return Delivery::Dropped;
        }
        self.packets.lock().unwrap().push(packet);
        Delivery::Accepted
    }
}

/// Host whose `deliver` blocks until the test opens the gate.
#[derive(Default)]
pub struct GatedHost {
    state: Mutex<(bool, bool)>,
    cond: Condvar,
}

impl GatedHost {
    /// A delivery is waiting at the gate.
    pub fn is_holding(&self) -> bool {
        self.state.lock().unwrap().0
    }

    pub fn open(&self) {
        self.state.lock().unwrap().1 = true;
        self.cond.notify_all();
    }
}

impl HostStack for GatedHost {
    fn deliver(&self, _packet: RxPacket) -> Delivery {
        let mut st = self.state.lock().unwrap();
        st.0 = true;
        self.cond.notify_all();
        while !st.1 {
            st = self.cond.wait(st).unwrap();
        }
        Delivery::Accepted
    }
}

/// Clock that only moves when the driver relaxes or the test advances it.
pub struct SimClock {
    now: AtomicU64,
    step: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            step: AtomicU64::new(1_000),
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn relax(&self) {
        self.now
            .fetch_add(self.step.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TEST BENCH
// ═══════════════════════════════════════════════════════════════════════════

pub struct Sim {
    pub variant: DeviceVariant,
    pub mem: Arc<SimMemory>,
    pub dma: Arc<SimDma>,
    pub bar0: Arc<SimBar0>,
    pub switch: Arc<SimSwitch>,
    pub irq: Arc<SimInterrupts>,
    pub poll: Arc<PollState>,
    pub host: Arc<SimHost>,
    pub clock: Arc<SimClock>,
}

impl Sim {
    pub fn new(variant: DeviceVariant) -> Self {
        init_logger();
        let mem = Arc::new(SimMemory::new());
        let bar0 = Arc::new(SimBar0::new());
        Self {
            variant,
            dma: Arc::new(SimDma::new(mem.clone())),
            switch: Arc::new(SimSwitch::new(variant, bar0.clone(), mem.clone())),
            bar0,
            mem,
            irq: Arc::new(SimInterrupts::default()),
            poll: Arc::new(PollState::new()),
            host: Arc::new(SimHost::default()),
            clock: Arc::new(SimClock::new()),
        }
    }

    pub fn flat() -> Self {
        Self::new(DeviceVariant::Flat)
    }

    pub fn windowed() -> Self {
        Self::new(DeviceVariant::Windowed)
    }

    pub fn resources(&self) -> DeviceResources {
        DeviceResources {
            bar0: self.bar0.clone(),
            bar2: self.switch.clone(),
            dma: self.dma.clone(),
            host: self.host.clone(),
            scheduler: self.poll.clone(),
            interrupts: self.irq.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn device(&self) -> SdmaDevice {
        SdmaDevice::new(self.variant, self.resources())
    }

    /// Device with small rings on `rx_mask` and TX queue 0, not opened.
    pub fn configured(&self, rx_mask: u8) -> SdmaDevice {
        let dev = self.device();
        configure(&dev, rx_mask);
        dev
    }

    /// Configured and opened device.
    pub fn open(&self, rx_mask: u8) -> SdmaDevice {
        let dev = self.configured(rx_mask);
        dev.open().unwrap();
        dev
    }

    /// Ring base the driver gave RX `queue`.
    pub fn rx_ring_base(&self, queue: u8) -> u32 {
        self.switch.reg(rx_first_desc(queue))
    }

    /// Raise the global cause register and post the interrupt.
    pub fn fire_interrupt(&self, cause: u32) -> bool {
        let old = self.switch.reg(CAUSE_0);
        self.switch.set_reg(CAUSE_0, old | cause);
        self.irq.fire()
    }
}

/// Small rings on `rx_mask` and TX queue 0.
pub fn configure(dev: &SdmaDevice, rx_mask: u8) {
    dev.set_parameter("rx_ring_size", &TEST_RING_SIZE.to_string()).unwrap();
    dev.set_parameter("max_pkt_sz", &TEST_PKT_SZ.to_string()).unwrap();
    dev.set_parameter("tx_queue", "0").unwrap();
    dev.set_parameter("rx_queues", &format!("0x{:x}", rx_mask)).unwrap();
}

pub const DST_MAC: [u8; 6] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
pub const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const RX_TAG: [u8; 16] = [0xEE; 16];
pub const CRC: [u8; 4] = [0xCC; 4];

/// Frame as the SDMA writes it: MACs, 16-byte tag, payload, CRC.
pub fn tagged_frame(payload: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&DST_MAC);
    f.extend_from_slice(&SRC_MAC);
    f.extend_from_slice(&RX_TAG);
    f.extend_from_slice(payload);
    f.extend_from_slice(&CRC);
    f
}

/// Frame as the host should see it.
pub fn host_frame(payload: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&DST_MAC);
    f.extend_from_slice(&SRC_MAC);
    f.extend_from_slice(payload);
    f
}

/// Wait up to a second for `cond`.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
