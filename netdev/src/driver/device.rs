//! Device context.
//!
//! # Lock order
//! ```text
//! config ─> tx ─> rx ─> registers
//! ```
//! `tag`, `mac` and `active` are leaves. The register lock lives inside
//! [`Registers`] and is never held across a call out of the driver.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dma_pool::{ArenaSizer, CoherentArena};
use spin::Mutex;

use super::irq::{InterruptWorker, IrqContext, WakeSignal};
use super::rx::{ring_bytes, ring_order, RxContext, RxPath, RxSetup, CRC_SIZE, RX_TAG_SIZE};
use super::traits::{InterruptSource, PollScheduler};
use super::tx::{TxFrame, TxPath, TxTag};
use crate::config::{ConfigState, DriverConfig, Locks, DEFAULT_MAC, DEFAULT_RX_WEIGHTS};
use crate::dma::SharedDmaPlatform;
use crate::error::{Result, SdmaError};
use crate::hw::{DeviceVariant, MgWindows, MmioRegion, Registers};
use crate::stack::HostStack;
use crate::stats::{DriverStats, InterfaceCounters, InterfaceStats, Stat};
use crate::time::Clock;

/// Everything the device needs from its surroundings.
pub struct DeviceResources {
    /// iATU control registers.
    pub bar0: Arc<dyn MmioRegion>,
    /// Switch registers.
    pub bar2: Arc<dyn MmioRegion>,
    pub dma: SharedDmaPlatform,
    pub host: Arc<dyn HostStack>,
    pub scheduler: Arc<dyn PollScheduler>,
    pub interrupts: Arc<dyn InterruptSource>,
    pub clock: Arc<dyn Clock>,
}

/// State that only exists while the device is up.
struct Active {
    arena: CoherentArena,
    worker: InterruptWorker,
    wake: Arc<WakeSignal>,
    windows: MgWindows,
    rx_mask: u8,
}

/// One switch SDMA network device.
pub struct SdmaDevice {
    pub(crate) variant: DeviceVariant,
    pub(crate) regs: Arc<Registers>,
    platform: SharedDmaPlatform,
    host: Arc<dyn HostStack>,
    scheduler: Arc<dyn PollScheduler>,
    interrupts: Arc<dyn InterruptSource>,
    pub(crate) clock: Arc<dyn Clock>,

    pub(crate) config: Mutex<ConfigState>,
    pub(crate) weights: AtomicU32,
    pub(crate) tag: Mutex<TxTag>,
    pub(crate) mac: Mutex<[u8; 6]>,

    pub(crate) stats: Arc<DriverStats>,
    pub(crate) if_stats: InterfaceStats,

    pub(crate) tx: Mutex<Option<TxPath>>,
    pub(crate) rx: Mutex<Option<RxPath>>,
    active: Mutex<Option<Active>>,
    up: AtomicBool,
}

impl SdmaDevice {
    pub fn new(variant: DeviceVariant, res: DeviceResources) -> Self {
        let regs = Registers::new(res.bar0, res.bar2, variant.default_atu_window());
        Self {
            variant,
            regs: Arc::new(regs),
            platform: res.dma,
            host: res.host,
            scheduler: res.scheduler,
            interrupts: res.interrupts,
            clock: res.clock,
            config: Mutex::new(ConfigState::default()),
            weights: AtomicU32::new(DEFAULT_RX_WEIGHTS),
            tag: Mutex::new(TxTag::default()),
            mac: Mutex::new(DEFAULT_MAC),
            stats: Arc::new(DriverStats::new()),
            if_stats: InterfaceStats::new(),
            tx: Mutex::new(None),
            rx: Mutex::new(None),
            active: Mutex::new(None),
            up: AtomicBool::new(false),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OPEN / STOP
    // ═══════════════════════════════════════════════════════════════════════

    /// Build the rings, start the interrupt worker and unmask RX interrupts.
    ///
    /// Any failure undoes the steps already taken.
    pub fn open(&self) -> Result<()> {
        let mut cfg = self.config.lock();
        if self.is_up() {
            return Err(SdmaError::DeviceBusy);
        }

        let values = cfg.values;
        let Some(tx_queue) = values.tx_queue else {
            log::error!("can't open device while tx_queue is not set");
            return Err(SdmaError::TxQueueUnset);
        };
        if values.rx_queues == 0 {
            log::error!("can't open device while rx_queues is not set");
            return Err(SdmaError::RxQueuesUnset);
        }
        if self.variant.is_windowed() && self.regs.atu_window().is_none() {
            log::error!("can't open device while atu_win is not set");
            return Err(SdmaError::AtuWindowUnset);
        }
        let Some(coherent_win) = values.mg_windows.coherent else {
            log::error!("coherent memory window is not set");
            return Err(SdmaError::MemoryWindowUnset("coherent"));
        };

        let mut arena = CoherentArena::reserve(&*self.platform, arena_size(&values))?;
        let base = match arena.region().bus_addr32() {
            Ok(base) => base,
            Err(e) => {
                // SAFETY: the device never saw the arena.
                unsafe { arena.free_all(&*self.platform) };
                return Err(e.into());
            }
        };
        self.regs
            .setup_mg_window(self.variant, coherent_win, base, (arena.size() - 1) as u32);

        let (tx, rx) = match self.start_rings(&mut arena, &values, tx_queue) {
            Ok(paths) => paths,
            Err(e) => {
                self.release(arena, values.mg_windows);
                return Err(e);
            }
        };

        let (worker, wake) = match self.start_interrupts(values.rx_queues) {
            Ok(started) => started,
            Err(e) => {
                tx.teardown(&self.regs);
                rx.teardown(&self.regs);
                drop((tx, rx));
                self.release(arena, values.mg_windows);
                return Err(e);
            }
        };

        cfg.locks |= Locks::POLL_BUDGET;

        self.regs.disable_tx_interrupts(tx_queue);
        self.regs.enable_rx_interrupts(values.rx_queues);

        *self.tx.lock() = Some(tx);
        *self.rx.lock() = Some(rx);
        *self.active.lock() = Some(Active {
            arena,
            worker,
            wake,
            windows: values.mg_windows,
            rx_mask: values.rx_queues,
        });
        self.up.store(true, Ordering::Release);

        log::info!(
            "device up: rx mask 0x{:02x}, tx queue {}, arena {} KiB",
            values.rx_queues,
            tx_queue,
            arena_size(&values) / 1024
        );
        Ok(())
    }

    fn start_rings(
        &self,
        arena: &mut CoherentArena,
        values: &DriverConfig,
        tx_queue: u8,
    ) -> Result<(TxPath, RxPath)> {
        let rx = RxPath::setup(
            &self.regs,
            arena,
            &self.platform,
            &RxSetup {
                variant: self.variant,
                windows: values.mg_windows,
                mask: values.rx_queues,
                ring_size: values.rx_ring_size,
                buf_size: values.max_pkt_sz,
            },
        )?;

        match TxPath::setup(&self.regs, arena, tx_queue) {
            Ok(tx) => Ok((tx, rx)),
            Err(e) => {
                log::error!("failed to create tx ring {}: {}", tx_queue, e);
                rx.teardown(&self.regs);
                Err(e)
            }
        }
    }

    fn start_interrupts(&self, rx_mask: u8) -> Result<(InterruptWorker, Arc<WakeSignal>)> {
        let wake = Arc::new(WakeSignal::new());
        let worker = InterruptWorker::spawn(
            wake.clone(),
            IrqContext {
                regs: self.regs.clone(),
                stats: self.stats.clone(),
                scheduler: self.scheduler.clone(),
                rx_mask,
            },
        )?;

        self.scheduler.enable();

        if let Err(e) = self.interrupts.register(wake.clone()) {
            log::error!("failed to register interrupt handler");
            self.scheduler.disable();
            worker.stop();
            return Err(e);
        }

        Ok((worker, wake))
    }

    /// Free the arena and close every memory window the driver owns.
    fn release(&self, arena: CoherentArena, windows: MgWindows) {
        // SAFETY: every ring pointing into the arena has been detached from
        // its queue.
        unsafe { arena.free_all(&*self.platform) };
        for w in windows.iter() {
            self.regs.clear_mg_window(self.variant, w);
        }
    }

    /// Quiesce the device and release everything [`open`](Self::open) built.
    pub fn stop(&self) -> Result<()> {
        let _cfg = self.config.lock();
        let Some(active) = self.active.lock().take() else {
            return Err(SdmaError::NotOpen);
        };

        // Blocks until a running poll returns, so it cannot unmask again.
        let rx = self.rx.lock().take();

        self.regs.disable_rx_interrupts(active.rx_mask);
        self.interrupts.unregister(&active.wake);
        self.scheduler.disable();
        active.worker.stop();
        active.wake.shutdown();

        if let Some(tx) = self.tx.lock().take() {
            tx.teardown(&self.regs);
        }
        if let Some(rx) = rx {
            rx.teardown(&self.regs);
        }

        self.release(active.arena, active.windows);
        self.up.store(false, Ordering::Release);

        log::info!("device down");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DATA PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Transmit one frame and wait for the SDMA to take it.
    ///
    /// # Returns
    /// - `Ok(bytes)`: payload bytes sent (MACs and tag excluded)
    /// - `Err(SdmaError::Tx(_))`: frame rejected or timed out, counted as a
    ///   drop
    /// - `Err(SdmaError::NotOpen)`: device is down
    pub fn start_xmit(&self, frame: &TxFrame<'_>) -> Result<usize> {
        let mut tx = self.tx.lock();
        let Some(path) = tx.as_mut() else {
            return Err(SdmaError::NotOpen);
        };

        let tag = *self.tag.lock();
        match path.xmit(&self.regs, &*self.clock, frame, &tag) {
            Ok(bytes) => {
                self.stats.inc(Stat::TxPackets);
                self.if_stats.tx_ok(bytes);
                Ok(bytes)
            }
            Err(e) => {
                log::debug!("tx dropped: {}", e);
                self.if_stats.tx_drop();
                Err(e.into())
            }
        }
    }

    /// Run the RX poll routine with `budget`.
    ///
    /// Returns the number of descriptors consumed, 0 while the device is
    /// down.
    pub fn poll(&self, budget: usize) -> usize {
        let mut rx = self.rx.lock();
        let Some(path) = rx.as_mut() else {
            return 0;
        };

        let ctx = RxContext {
            regs: &self.regs,
            host: &*self.host,
            scheduler: &*self.scheduler,
            stats: &self.stats,
            if_stats: &self.if_stats,
            weights: self.weights.load(Ordering::Relaxed),
        };
        path.poll(&ctx, budget)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn variant(&self) -> DeviceVariant {
        self.variant
    }

    pub fn registers(&self) -> &Arc<Registers> {
        &self.regs
    }

    /// Budget the host should pass to [`poll`](Self::poll).
    pub fn poll_budget(&self) -> usize {
        self.config.lock().values.poll_budget
    }

    pub fn config(&self) -> DriverConfig {
        self.config.lock().values
    }

    pub fn mac_address(&self) -> [u8; 6] {
        *self.mac.lock()
    }

    /// Largest Ethernet frame the RX buffers hold after tag and CRC removal.
    pub fn max_frame_size(&self) -> usize {
        self.config.lock().values.max_pkt_sz - RX_TAG_SIZE - CRC_SIZE
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn interface_stats(&self) -> InterfaceCounters {
        self.if_stats.snapshot()
    }
}

impl Drop for SdmaDevice {
    fn drop(&mut self) {
        if self.is_up() {
            let _ = self.stop();
        }
    }
}

/// Arena size covering every carve-out `open` makes.
fn arena_size(values: &DriverConfig) -> usize {
    let mut sizer = ArenaSizer::new();
    for _ in ring_order(values.rx_queues) {
        sizer.add(ring_bytes(values.rx_ring_size));
    }
    for carve in TxPath::arena_carves() {
        sizer.add(carve);
    }
    sizer.arena_size()
}
