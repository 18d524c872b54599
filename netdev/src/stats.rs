//! Driver and interface counters.
//!
//! Driver counters are indexed by bit position, which is also the bit a
//! `statistics` clear mask uses:
//!
//! ```text
//! bit  0  INTERRUPTS         bit  5  RX_PACKETS_RATE   (derived)
//! bit  1  RX_INTERRUPTS      bit  6  RX_PKT_PER_INTR   (derived)
//! bit  2  NAPI_POLL_CALLS    bit  7  RX_Q0_PACKETS
//! bit  3  NAPI_BURN_BUDGET   ...
//! bit  4  RX_PACKETS         bit 14  RX_Q7_PACKETS
//!                            bit 15  TX_PACKETS
//! ```

use core::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::hw::regs::NUM_RX_QUEUES;

/// Number of driver counters.
pub const NUM_STATS: usize = 16;

/// Clear-mask bit selecting the interface counters.
pub const CLEAR_INTERFACE_STATS: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Interrupts,
    RxInterrupts,
    PollCalls,
    PollBurnBudget,
    RxPackets,
    RxPacketsRate,
    RxPacketsPerInterrupt,
    RxQueue(u8),
    TxPackets,
}

impl Stat {
    /// Every counter in display order.
    pub fn all() -> impl Iterator<Item = Stat> {
        (0..NUM_STATS).filter_map(Self::from_index)
    }

    pub fn index(self) -> usize {
        match self {
            Self::Interrupts => 0,
            Self::RxInterrupts => 1,
            Self::PollCalls => 2,
            Self::PollBurnBudget => 3,
            Self::RxPackets => 4,
            Self::RxPacketsRate => 5,
            Self::RxPacketsPerInterrupt => 6,
            Self::RxQueue(q) => 7 + (q as usize % NUM_RX_QUEUES),
            Self::TxPackets => 15,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => Self::Interrupts,
            1 => Self::RxInterrupts,
            2 => Self::PollCalls,
            3 => Self::PollBurnBudget,
            4 => Self::RxPackets,
            5 => Self::RxPacketsRate,
            6 => Self::RxPacketsPerInterrupt,
            7..=14 => Self::RxQueue((index - 7) as u8),
            15 => Self::TxPackets,
            _ => return None,
        })
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        const RX_QUEUE_NAMES: [&str; NUM_RX_QUEUES] = [
            "RX_Q0_PACKETS",
            "RX_Q1_PACKETS",
            "RX_Q2_PACKETS",
            "RX_Q3_PACKETS",
            "RX_Q4_PACKETS",
            "RX_Q5_PACKETS",
            "RX_Q6_PACKETS",
            "RX_Q7_PACKETS",
        ];
        match self {
            Self::Interrupts => "INTERRUPTS",
            Self::RxInterrupts => "RX_INTERRUPTS",
            Self::PollCalls => "NAPI_POLL_CALLS",
            Self::PollBurnBudget => "NAPI_BURN_BUDGET",
            Self::RxPackets => "RX_PACKETS",
            Self::RxPacketsRate => "RX_PACKETS_RATE",
            Self::RxPacketsPerInterrupt => "RX_PKT_PER_INTR",
            Self::RxQueue(q) => RX_QUEUE_NAMES[q as usize % NUM_RX_QUEUES],
            Self::TxPackets => "TX_PACKETS",
        }
    }

    fn is_derived(self) -> bool {
        matches!(self, Self::RxPacketsRate | Self::RxPacketsPerInterrupt)
    }
}

/// Sample the rate is measured from.
#[derive(Debug, Default)]
struct RateSample {
    packets: u64,
    time_us: u64,
}

/// Driver counters.
#[derive(Debug, Default)]
pub struct DriverStats {
    counters: [AtomicU64; NUM_STATS],
    rate: Mutex<RateSample>,
}

impl DriverStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self, stat: Stat) {
        self.add(stat, 1);
    }

    #[inline]
    pub fn add(&self, stat: Stat, n: u64) {
        if !stat.is_derived() {
            self.counters[stat.index()].fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Raw counter value. Derived counters read as 0; use
    /// [`value`](Self::value) for them.
    pub fn get(&self, stat: Stat) -> u64 {
        self.counters[stat.index()].load(Ordering::Relaxed)
    }

    /// Counter value with derived counters computed.
    ///
    /// Reading the rate restarts its measurement at `now_us`.
    pub fn value(&self, stat: Stat, now_us: u64) -> u64 {
        match stat {
            Stat::RxPacketsPerInterrupt => {
                let irqs = self.get(Stat::Interrupts);
                if irqs == 0 {
                    0
                } else {
                    self.get(Stat::RxPackets) / irqs
                }
            }
            Stat::RxPacketsRate => {
                let packets = self.get(Stat::RxPackets);
                let mut sample = self.rate.lock();
                let elapsed = now_us.saturating_sub(sample.time_us);
                let delta = packets.saturating_sub(sample.packets);
                sample.packets = packets;
                sample.time_us = now_us;
                if elapsed == 0 {
                    0
                } else {
                    delta.saturating_mul(1_000_000) / elapsed
                }
            }
            _ => self.get(stat),
        }
    }

    /// Zero the counters whose bits are set in `mask`.
    pub fn clear(&self, mask: u32, now_us: u64) {
        for (i, counter) in self.counters.iter().enumerate() {
            if mask & (1 << i) != 0 {
                counter.store(0, Ordering::Relaxed);
            }
        }
        if mask & ((1 << Stat::RxPacketsRate.index()) | (1 << Stat::RxPackets.index())) != 0 {
            let mut sample = self.rate.lock();
            sample.packets = self.get(Stat::RxPackets);
            sample.time_us = now_us;
        }
    }

    /// One `NAME            : value` line per counter.
    pub fn render(&self, now_us: u64) -> String {
        let mut out = String::new();
        for stat in Stat::all() {
            let _ = writeln!(out, "{:<16}: {}", stat.name(), self.value(stat, now_us));
        }
        out
    }
}

/// Point-in-time copy of [`InterfaceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
}

/// Counters the host network interface reports.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_dropped: AtomicU64,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rx_ok(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn rx_drop(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tx_ok(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn tx_drop(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InterfaceCounters {
        InterfaceCounters {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        for c in [
            &self.rx_packets,
            &self.rx_bytes,
            &self.rx_dropped,
            &self.tx_packets,
            &self.tx_bytes,
            &self.tx_dropped,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
