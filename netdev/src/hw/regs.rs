//! Switch register map.
//!
//! Addresses are logical switch addresses. They reach the device through
//! BAR2, either directly (flat devices) or through an iATU window.

// ═══════════════════════════════════════════════════════════════════════════
// iATU (BAR0)
// ═══════════════════════════════════════════════════════════════════════════

/// Offset of the iATU block inside BAR0.
pub const ATU_OFFS: usize = 0x1200;
/// Stride between iATU window register blocks.
pub const ATU_WIN_STRIDE: usize = 0x0200;
/// Inbound sub-block inside a window block.
pub const ATU_INBOUND: usize = 0x0100;
/// Number of iATU windows.
pub const NUM_ATU_WINDOWS: u8 = 8;

/// Window register: region control 1.
pub const ATU_CTRL1: usize = 0x00;
/// Window register: region control 2.
pub const ATU_CTRL2: usize = 0x04;
/// Window register: lower base address.
pub const ATU_START: usize = 0x08;
/// Window register: limit address.
pub const ATU_LIMIT: usize = 0x10;
/// Window register: lower target address.
pub const ATU_TARGET: usize = 0x14;

/// Region control 2 value that enables a window.
pub const ATU_CTRL2_ENABLE: u32 = 0x8000_0000;

/// High bits selecting a 1MB window.
pub const WINDOW_BASE_MASK: u32 = 0xFFF0_0000;
/// Low bits addressing a register inside a window.
pub const WINDOW_OFFSET_MASK: u32 = 0x000F_FFFF;

/// BAR0 offset of the inbound register block of `window`.
#[inline]
pub const fn atu_inbound(window: u8) -> usize {
    ATU_OFFS + window as usize * ATU_WIN_STRIDE + ATU_INBOUND
}

// ═══════════════════════════════════════════════════════════════════════════
// SWITCH REGISTERS (BAR2)
// ═══════════════════════════════════════════════════════════════════════════

pub const REG_BASE: u32 = 0x1D00_0000;

pub const VENDOR_ID: u32 = REG_BASE + 0x0050;
pub const DEVICE_ID: u32 = REG_BASE + 0x004C;

/// Global interrupt cause register.
pub const CAUSE_0: u32 = REG_BASE + 0x0030;
/// RX SDMA summary bit in [`CAUSE_0`].
pub const CAUSE_RX_BIT: u32 = 1 << 9;

pub const RX_FIRST_DESC: u32 = REG_BASE + 0x260C;
pub const RX_FIRST_DESC_STRIDE: u32 = 0x10;
pub const RX_QUEUE_CMD: u32 = REG_BASE + 0x2680;

pub const TX_FIRST_DESC: u32 = REG_BASE + 0x26C0;
pub const TX_FIRST_DESC_STRIDE: u32 = 0x4;
pub const TX_QUEUE_CMD: u32 = REG_BASE + 0x2868;

/// SDMA configuration.
pub const SDMA_CONF: u32 = REG_BASE + 0x2800;
/// Receive packets on buffer boundaries.
pub const SDMA_CONF_RX_BOUNDARIES: u32 = 0x1;

pub const RX_MASK_0: u32 = REG_BASE + 0x2814;
pub const TX_MASK_0: u32 = REG_BASE + 0x2818;

pub const MG_BASE_ADDR: u32 = REG_BASE + 0x020C;
pub const MG_BASE_ADDR_STRIDE: u32 = 0x8;
pub const MG_SIZE: u32 = REG_BASE + 0x0210;
pub const MG_SIZE_STRIDE: u32 = 0x8;
pub const MG_HA: u32 = REG_BASE + 0x023C;
pub const MG_HA_STRIDE: u32 = 0x4;
pub const MG_CONTROL: u32 = REG_BASE + 0x0254;
pub const MG_CONTROL_STRIDE: u32 = 0x4;

/// Number of memory windows.
pub const NUM_MG_WINDOWS: u8 = 8;

/// Number of RX SDMA queues.
pub const NUM_RX_QUEUES: usize = 8;
/// Number of TX SDMA queues.
pub const NUM_TX_QUEUES: usize = 8;

#[inline]
pub const fn rx_first_desc(queue: u8) -> u32 {
    RX_FIRST_DESC + queue as u32 * RX_FIRST_DESC_STRIDE
}

#[inline]
pub const fn tx_first_desc(queue: u8) -> u32 {
    TX_FIRST_DESC + queue as u32 * TX_FIRST_DESC_STRIDE
}

/// Queue command bit that enables `queue`.
#[inline]
pub const fn queue_enable_bit(queue: u8) -> u32 {
    1 << queue
}

/// Queue command bit that disables `queue`.
#[inline]
pub const fn queue_disable_bit(queue: u8) -> u32 {
    1 << (queue + 8)
}

/// RX mask bits for completion events of the queues in `mask`.
#[inline]
pub const fn rx_completion_bits(mask: u8) -> u32 {
    (mask as u32) << 2
}

/// RX mask bits for resource-error events of the queues in `mask`.
#[inline]
pub const fn rx_resource_error_bits(mask: u8) -> u32 {
    (mask as u32) << 11
}

/// TX mask bits for buffer, error and end events of `queue`.
#[inline]
pub const fn tx_event_bits(queue: u8) -> u32 {
    (1 << (queue + 1)) | (1 << (queue + 9)) | (1 << (queue + 17))
}
