//! Parsers for parameter values.
//!
//! Pure functions: each takes the raw string and returns the typed value or
//! a short reason. Callers decide what the value does to the device.

use crate::dma::descriptor::MAX_BYTE_COUNT;
use crate::driver::rx::MAX_RX_RING_SIZE;
use crate::driver::tx::{TxTag, MAX_TAG_SIZE};
use crate::hw::regs::{NUM_ATU_WINDOWS, NUM_TX_QUEUES};

pub type ParseResult<T> = core::result::Result<T, &'static str>;

/// Smallest accepted packet buffer.
pub const MIN_PKT_SZ: usize = 64;
pub const MAX_POLL_BUDGET: usize = 1024;

/// `0x`-prefixed hexadecimal number.
pub fn hex_u32(s: &str) -> ParseResult<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or("expecting 0x<hex>")?;
    u32::from_str_radix(digits, 16).map_err(|_| "expecting 0x<hex>")
}

fn decimal(s: &str) -> ParseResult<i64> {
    s.trim().parse::<i64>().map_err(|_| "expecting a decimal number")
}

fn hex_u8(s: &str) -> ParseResult<u8> {
    let v = hex_u32(s)?;
    u8::try_from(v).map_err(|_| "expecting an 8-bit mask")
}

/// RX queue bitmap. At least one queue.
pub fn rx_queues(s: &str) -> ParseResult<u8> {
    match hex_u8(s)? {
        0 => Err("no queue selected"),
        mask => Ok(mask),
    }
}

/// Queue or window index, `-1` meaning none.
fn index_or_none(s: &str, count: usize) -> ParseResult<Option<u8>> {
    match decimal(s)? {
        -1 => Ok(None),
        v if (0..count as i64).contains(&v) => Ok(Some(v as u8)),
        _ => Err("index out of range"),
    }
}

pub fn tx_queue(s: &str) -> ParseResult<Option<u8>> {
    index_or_none(s, NUM_TX_QUEUES)
}

pub fn atu_win(s: &str) -> ParseResult<Option<u8>> {
    index_or_none(s, NUM_ATU_WINDOWS as usize)
}

pub fn mg_win(s: &str) -> ParseResult<u8> {
    hex_u8(s)
}

/// RX buffer size. Must leave room for MACs, tag and CRC and fit the
/// 14-bit byte count.
pub fn max_pkt_sz(s: &str) -> ParseResult<usize> {
    match decimal(s)? {
        v if (MIN_PKT_SZ as i64..=MAX_BYTE_COUNT as i64).contains(&v) => Ok(v as usize),
        _ => Err("expecting 64..=16383"),
    }
}

/// RX ring size, rounded up to a power of two.
pub fn rx_ring_size(s: &str) -> ParseResult<usize> {
    match decimal(s)? {
        v if (1..=MAX_RX_RING_SIZE as i64).contains(&v) => Ok((v as usize).next_power_of_two()),
        _ => Err("expecting 1..=2048"),
    }
}

pub fn poll_budget(s: &str) -> ParseResult<usize> {
    match decimal(s)? {
        v if (1..=MAX_POLL_BUDGET as i64).contains(&v) => Ok(v as usize),
        _ => Err("expecting 1..=1024"),
    }
}

/// Packed RX weights. A zero weight would starve its queue.
pub fn rx_queues_weight(s: &str) -> ParseResult<u32> {
    let w = hex_u32(s)?;
    if (0..8).any(|q| (w >> (4 * q)) & 0xF == 0) {
        return Err("every queue needs a non-zero weight");
    }
    Ok(w)
}

/// `aa:bb:cc:dd:ee:ff`.
pub fn mac(s: &str) -> ParseResult<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.trim().split(':');
    for byte in out.iter_mut() {
        let part = parts.next().ok_or("expecting aa:bb:cc:dd:ee:ff")?;
        if part.is_empty() || part.len() > 2 {
            return Err("expecting aa:bb:cc:dd:ee:ff");
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| "expecting aa:bb:cc:dd:ee:ff")?;
    }
    if parts.next().is_some() {
        return Err("expecting aa:bb:cc:dd:ee:ff");
    }
    Ok(out)
}

/// Up to 16 space separated hex bytes.
pub fn tag(s: &str) -> ParseResult<TxTag> {
    let mut bytes = [0u8; MAX_TAG_SIZE];
    let mut len = 0;
    for part in s.split_whitespace() {
        if len == MAX_TAG_SIZE {
            return Err("at most 16 bytes");
        }
        if part.len() > 2 {
            return Err("expecting hex bytes");
        }
        bytes[len] = u8::from_str_radix(part, 16).map_err(|_| "expecting hex bytes")?;
        len += 1;
    }
    TxTag::new(&bytes[..len]).ok_or("expecting hex bytes")
}

/// `0x<addr>` or `0x<addr> 0x<value>`.
pub fn reg(s: &str) -> ParseResult<(u32, Option<u32>)> {
    let mut parts = s.split_whitespace();
    let addr = hex_u32(parts.next().ok_or("expecting 0x<addr> [0x<val>]")?)?;
    let value = parts.next().map(hex_u32).transpose()?;
    if parts.next().is_some() {
        return Err("expecting 0x<addr> [0x<val>]");
    }
    Ok((addr, value))
}
