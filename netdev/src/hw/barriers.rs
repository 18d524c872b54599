//! Memory barriers for descriptor handoff.
//!
//! Descriptors live in coherent memory shared with the SDMA. The CPU must
//! order its descriptor writes before the ownership flip, and the ownership
//! flip before the doorbell register write.

use core::sync::atomic::{fence, Ordering};

/// Order all prior descriptor writes before a following ownership write.
#[inline]
pub fn wmb() {
    fence(Ordering::Release);
}

/// Order an ownership read before the reads of the fields it guards.
#[inline]
pub fn rmb() {
    fence(Ordering::Acquire);
}

/// Full barrier: descriptor memory against MMIO doorbells.
#[inline]
pub fn mb() {
    fence(Ordering::SeqCst);
}
