//! Interrupt bridge.
//!
//! ```text
//!  platform IRQ ──post──> WakeSignal ──wait──> sdma-irq worker
//!                                                 │ read CAUSE_0
//!                                                 │ mask RX interrupts
//!                                                 ▼
//!                                        PollScheduler::schedule
//!                                                 │
//!                         host runs SdmaDevice::poll ─> complete + unmask
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use super::traits::PollScheduler;
use crate::error::{Result, SdmaError};
use crate::hw::regs::{CAUSE_0, CAUSE_RX_BIT};
use crate::hw::Registers;
use crate::stats::{DriverStats, Stat};

// ═══════════════════════════════════════════════════════════════════════════
// WAKE SIGNAL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct WakeState {
    count: u64,
    shutdown: bool,
}

/// Counting semaphore posted by the platform once per interrupt.
#[derive(Default)]
pub struct WakeSignal {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event and wake the waiter.
    pub fn post(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.count += 1;
        self.cond.notify_one();
    }

    /// Block until an event is available and consume it.
    ///
    /// Returns `false` once the signal has been shut down.
    pub fn wait(&self) -> bool {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if st.shutdown {
                return false;
            }
            if st.count > 0 {
                st.count -= 1;
                return true;
            }
            st = self.cond.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Release every waiter for good.
    pub fn shutdown(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.shutdown = true;
        self.cond.notify_all();
    }

    /// Events posted but not consumed yet.
    pub fn pending(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).count
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// POLL STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Flag-based [`PollScheduler`] for hosts that run the poll routine from
/// their own loop.
///
/// The host checks [`is_pending`](Self::is_pending) and calls
/// `SdmaDevice::poll` while it is set.
#[derive(Debug, Default)]
pub struct PollState {
    enabled: AtomicBool,
    pending: AtomicBool,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl PollScheduler for PollState {
    fn schedule(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.pending.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════

/// Everything the worker touches on each wake.
pub(crate) struct IrqContext {
    pub regs: Arc<Registers>,
    pub stats: Arc<DriverStats>,
    pub scheduler: Arc<dyn PollScheduler>,
    /// RX queue bitmap to mask.
    pub rx_mask: u8,
}

/// One interrupt event: read the cause and hand RX work to the poller.
pub(crate) fn handle_interrupt(ctx: &IrqContext) {
    ctx.stats.inc(Stat::Interrupts);

    let cause = ctx.regs.read(CAUSE_0);
    if cause & CAUSE_RX_BIT == 0 {
        return;
    }

    ctx.stats.inc(Stat::RxInterrupts);
    ctx.regs.disable_rx_interrupts(ctx.rx_mask);
    ctx.scheduler.schedule();
}

/// Blocking thread servicing the wake signal.
pub(crate) struct InterruptWorker {
    stop: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptWorker {
    pub fn spawn(wake: Arc<WakeSignal>, ctx: IrqContext) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_wake = wake.clone();
        let handle = thread::Builder::new()
            .name("sdma-irq".into())
            .spawn(move || {
                log::debug!("interrupt worker started");
                while thread_wake.wait() {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    handle_interrupt(&ctx);
                }
                log::debug!("interrupt worker exiting");
            })
            .map_err(|e| {
                log::error!("failed to spawn interrupt worker: {}", e);
                SdmaError::WorkerSpawn
            })?;

        Ok(Self {
            stop,
            wake,
            handle: Some(handle),
        })
    }

    /// Tell the worker to exit and join it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.wake.post();
        if handle.join().is_err() {
            log::error!("interrupt worker panicked");
        }
    }
}

impl Drop for InterruptWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
