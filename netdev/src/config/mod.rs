//! Named runtime parameters.
//!
//! Every parameter is read and written as a string through
//! [`SdmaDevice::parameter`] and [`SdmaDevice::set_parameter`]. Values are
//! parsed by the pure functions in [`parse`]; this module applies them.
//!
//! Some parameters shape the rings and turn read-only once they have been
//! used:
//!
//! | Parameter      | Becomes read-only                        |
//! |----------------|------------------------------------------|
//! | `rx_queues`    | after it is set                          |
//! | `rx_ring_size` | when `rx_queues` is set                  |
//! | `mg_win`       | on a write attempt after `rx_queues`     |
//! | `tx_queue`     | after it is set to a queue               |
//! | `max_pkt_sz`   | after it is set                          |
//! | `poll_budget`  | when the device opens                    |
//!
//! A rejected write leaves the previous value in place.

pub mod parse;

use core::fmt::{self, Write};
use core::str::FromStr;
use std::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::driver::tx::TxTag;
use crate::driver::SdmaDevice;
use crate::error::{Result, SdmaError};
use crate::hw::mg_window::DEFAULT_MG_WIN_MASK;
use crate::hw::regs::{NUM_MG_WINDOWS, NUM_TX_QUEUES};
use crate::hw::{MgWindows, QueueKind};
use crate::stats::CLEAR_INTERFACE_STATS;

pub const DEFAULT_RX_RING_SIZE: usize = 2048;
pub const DEFAULT_MAX_PKT_SZ: usize = 4096;
pub const DEFAULT_POLL_BUDGET: usize = 64;
pub const DEFAULT_RX_WEIGHTS: u32 = 0x8888_8888;
pub const DEFAULT_MAC: [u8; 6] = [0x00, 0x50, 0x43, 0x00, 0x00, 0x00];

/// Configurable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    RxQueues,
    TxQueue,
    AtuWin,
    MgWin,
    MaxPktSz,
    RxRingSize,
    PollBudget,
    RxQueuesWeight,
    Mac,
    Tag,
    Statistics,
    Reg,
}

impl Parameter {
    pub const ALL: [Parameter; 12] = [
        Self::RxQueues,
        Self::TxQueue,
        Self::AtuWin,
        Self::MgWin,
        Self::MaxPktSz,
        Self::RxRingSize,
        Self::PollBudget,
        Self::RxQueuesWeight,
        Self::Mac,
        Self::Tag,
        Self::Statistics,
        Self::Reg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RxQueues => "rx_queues",
            Self::TxQueue => "tx_queue",
            Self::AtuWin => "atu_win",
            Self::MgWin => "mg_win",
            Self::MaxPktSz => "max_pkt_sz",
            Self::RxRingSize => "rx_ring_size",
            Self::PollBudget => "poll_budget",
            Self::RxQueuesWeight => "rx_queues_weight",
            Self::Mac => "mac",
            Self::Tag => "tag",
            Self::Statistics => "statistics",
            Self::Reg => "reg",
        }
    }

    fn lock_bit(self) -> Locks {
        match self {
            Self::RxQueues => Locks::RX_QUEUES,
            Self::TxQueue => Locks::TX_QUEUE,
            Self::MgWin => Locks::MG_WIN,
            Self::MaxPktSz => Locks::MAX_PKT_SZ,
            Self::RxRingSize => Locks::RX_RING_SIZE,
            Self::PollBudget => Locks::POLL_BUDGET,
            _ => Locks::empty(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ConfigError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownParameter(s.into()))
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownParameter(String),
    /// Value did not parse or is out of range.
    Invalid(Parameter, &'static str),
    /// Parameter no longer accepts writes.
    ReadOnly(Parameter),
    /// Windowed devices need an iATU window first.
    AtuWindowRequired(Parameter),
    /// Parameter has no meaning on this device.
    Unsupported(Parameter),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParameter(name) => write!(f, "unknown parameter '{}'", name),
            Self::Invalid(p, why) => write!(f, "invalid {}: {}", p, why),
            Self::ReadOnly(p) => write!(f, "{} is read-only", p),
            Self::AtuWindowRequired(p) => write!(f, "{} requires atu_win", p),
            Self::Unsupported(p) => write!(f, "{} is not supported on this device", p),
        }
    }
}

bitflags! {
    /// Parameters that no longer accept writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Locks: u16 {
        const RX_QUEUES = 1 << 0;
        const TX_QUEUE = 1 << 1;
        const MG_WIN = 1 << 2;
        const MAX_PKT_SZ = 1 << 3;
        const RX_RING_SIZE = 1 << 4;
        const POLL_BUDGET = 1 << 5;
    }
}

/// Ring and queue layout applied at the next open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Enabled hardware RX queues, bit per queue.
    pub rx_queues: u8,
    pub tx_queue: Option<u8>,
    pub mg_windows: MgWindows,
    /// RX buffer size in bytes.
    pub max_pkt_sz: usize,
    pub rx_ring_size: usize,
    pub poll_budget: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rx_queues: 0,
            tx_queue: None,
            mg_windows: MgWindows::from_mask(DEFAULT_MG_WIN_MASK),
            max_pkt_sz: DEFAULT_MAX_PKT_SZ,
            rx_ring_size: DEFAULT_RX_RING_SIZE,
            poll_budget: DEFAULT_POLL_BUDGET,
        }
    }
}

/// Configuration guarded by the device's config lock.
#[derive(Debug, Default)]
pub(crate) struct ConfigState {
    pub values: DriverConfig,
    pub locks: Locks,
    /// Register selected by the last `reg` write.
    pub reg_addr: Option<u32>,
}

impl ConfigState {
    fn check_writable(&self, p: Parameter) -> Result<()> {
        let bit = p.lock_bit();
        if !bit.is_empty() && self.locks.contains(bit) {
            return Err(ConfigError::ReadOnly(p).into());
        }
        Ok(())
    }
}

fn invalid(p: Parameter) -> impl FnOnce(&'static str) -> SdmaError {
    move |why| {
        log::warn!("{}: {}", p, why);
        ConfigError::Invalid(p, why).into()
    }
}

impl SdmaDevice {
    /// Write parameter `name`.
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<()> {
        let p: Parameter = name.trim().parse()?;
        let mut cfg = self.config.lock();

        match p {
            Parameter::RxQueues => {
                cfg.check_writable(p)?;
                self.require_atu_window(p)?;
                let mask = parse::rx_queues(value).map_err(invalid(p))?;
                cfg.values.rx_queues = mask;
                cfg.locks |= Locks::RX_QUEUES | Locks::RX_RING_SIZE;
            }
            Parameter::TxQueue => {
                cfg.check_writable(p)?;
                self.require_atu_window(p)?;
                let queue = parse::tx_queue(value).map_err(invalid(p))?;
                cfg.values.tx_queue = queue;
                if queue.is_some() {
                    cfg.locks |= Locks::TX_QUEUE;
                }
            }
            Parameter::AtuWin => {
                if !self.variant.is_windowed() {
                    return Err(ConfigError::Unsupported(p).into());
                }
                self.require_down()?;
                let win = parse::atu_win(value).map_err(invalid(p))?;
                self.regs.set_atu_window(win);
            }
            Parameter::MgWin => {
                cfg.check_writable(p)?;
                if cfg.values.rx_queues != 0 {
                    log::error!("RX rings already set, cannot modify MG windows");
                    cfg.locks |= Locks::MG_WIN;
                    return Err(ConfigError::ReadOnly(p).into());
                }
                let mask = parse::mg_win(value).map_err(invalid(p))?;
                cfg.values.mg_windows = MgWindows::from_mask(mask);
            }
            Parameter::MaxPktSz => {
                cfg.check_writable(p)?;
                self.require_down()?;
                cfg.values.max_pkt_sz = parse::max_pkt_sz(value).map_err(invalid(p))?;
                cfg.locks |= Locks::MAX_PKT_SZ;
            }
            Parameter::RxRingSize => {
                cfg.check_writable(p)?;
                self.require_down()?;
                cfg.values.rx_ring_size = parse::rx_ring_size(value).map_err(invalid(p))?;
            }
            Parameter::PollBudget => {
                cfg.check_writable(p)?;
                cfg.values.poll_budget = parse::poll_budget(value).map_err(invalid(p))?;
            }
            Parameter::RxQueuesWeight => {
                let w = parse::rx_queues_weight(value).map_err(invalid(p))?;
                self.weights.store(w, Ordering::Relaxed);
            }
            Parameter::Mac => {
                *self.mac.lock() = parse::mac(value).map_err(invalid(p))?;
            }
            Parameter::Tag => {
                *self.tag.lock() = parse::tag(value).map_err(invalid(p))?;
            }
            Parameter::Statistics => {
                let mask = parse::hex_u32(value).map_err(invalid(p))?;
                self.stats.clear(mask & 0xFFFF, self.clock.now_us());
                if mask & CLEAR_INTERFACE_STATS != 0 {
                    self.if_stats.clear();
                }
            }
            Parameter::Reg => {
                let (addr, val) = parse::reg(value).map_err(invalid(p))?;
                cfg.reg_addr = Some(addr);
                if let Some(val) = val {
                    self.regs.write(addr, val);
                }
            }
        }

        log::debug!("{} <- {}", p, value.trim());
        Ok(())
    }

    /// Read parameter `name`, rendered as text.
    pub fn parameter(&self, name: &str) -> Result<String> {
        let p: Parameter = name.trim().parse()?;
        let cfg = self.config.lock();
        let mut out = String::new();

        match p {
            Parameter::RxQueues => {
                let rx = self.rx.lock();
                for q in crate::driver::rx::ring_order(cfg.values.rx_queues) {
                    let cursor = rx
                        .as_ref()
                        .and_then(|path| path.rings().iter().find(|r| r.queue() == q))
                        .map_or(0, |r| r.ring().desc_cursor());
                    let _ = writeln!(
                        out,
                        "queue {}: status {}, ring-idx {}",
                        q,
                        u8::from(self.regs.queue_enabled(QueueKind::Rx, q)),
                        cursor
                    );
                }
            }
            Parameter::TxQueue => {
                for q in 0..NUM_TX_QUEUES as u8 {
                    let _ = writeln!(
                        out,
                        "[{}{}] {}, 0x{:x}",
                        if cfg.values.tx_queue == Some(q) { '*' } else { ' ' },
                        q,
                        u8::from(self.regs.queue_enabled(QueueKind::Tx, q)),
                        self.regs.tx_first_desc(q)
                    );
                }
            }
            Parameter::AtuWin => {
                if self.variant.is_windowed() {
                    let selected = self.regs.atu_window();
                    for w in self.regs.atu_windows() {
                        let _ = writeln!(
                            out,
                            "[{}{}] 0x{:<8x}\t0x{:<8x}\t0x{:<8x}",
                            if selected == Some(w.index) { '*' } else { ' ' },
                            w.index,
                            w.start,
                            w.limit,
                            w.target
                        );
                    }
                }
            }
            Parameter::MgWin => {
                for w in 0..NUM_MG_WINDOWS {
                    let r = self.regs.mg_window(w);
                    let _ = writeln!(
                        out,
                        "[{}{}] 0x{:<8x}\t0x{:<8x}\t0x{:<8x}\t0x{:<8x}",
                        if cfg.values.mg_windows.contains(w) { '*' } else { ' ' },
                        w,
                        r.base,
                        r.size,
                        r.high_addr,
                        r.control
                    );
                }
            }
            Parameter::MaxPktSz => {
                let _ = writeln!(out, "{}", cfg.values.max_pkt_sz);
            }
            Parameter::RxRingSize => {
                let _ = writeln!(out, "{}", cfg.values.rx_ring_size);
            }
            Parameter::PollBudget => {
                let _ = writeln!(out, "{}", cfg.values.poll_budget);
            }
            Parameter::RxQueuesWeight => {
                let w = self.weights.load(Ordering::Relaxed);
                for q in 0..8u8 {
                    let _ = writeln!(out, "queue {}: {}", q, crate::driver::rx::queue_weight(w, q));
                }
            }
            Parameter::Mac => {
                let m = *self.mac.lock();
                let _ = writeln!(
                    out,
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    m[0], m[1], m[2], m[3], m[4], m[5]
                );
            }
            Parameter::Tag => {
                let tag: TxTag = *self.tag.lock();
                let hex: Vec<String> = tag.as_bytes().iter().map(|b| format!("{:02x}", b)).collect();
                let _ = writeln!(out, "{}", hex.join(" "));
            }
            Parameter::Statistics => {
                out = self.stats.render(self.clock.now_us());
            }
            Parameter::Reg => {
                if let Some(addr) = cfg.reg_addr {
                    let _ = writeln!(out, "0x{:x}", self.regs.read(addr));
                }
            }
        }

        Ok(out)
    }

    fn require_atu_window(&self, p: Parameter) -> Result<()> {
        if self.variant.is_windowed() && self.regs.atu_window().is_none() {
            log::error!("required atu_win configuration is missing");
            return Err(ConfigError::AtuWindowRequired(p).into());
        }
        Ok(())
    }

    fn require_down(&self) -> Result<()> {
        if self.is_up() {
            return Err(SdmaError::DeviceBusy);
        }
        Ok(())
    }
}
