//! Seams between the driver and the platform it runs on.
//!
//! The driver owns descriptor rings and register sequences. Everything else
//! (who runs the poll routine, how the interrupt line reaches us) is provided
//! by the host through these traits.

use core::fmt;
use std::sync::Arc;

use super::irq::WakeSignal;
use crate::error::Result;

/// TX error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// More payload fragments than the chain can carry.
    TooManyFragments(usize),
    /// Linear head shorter than the two MAC addresses.
    FrameTooShort,
    /// A segment does not fit one scratch page.
    FragmentTooLarge,
    /// A payload fragment is empty.
    EmptyFragment,
    /// The SDMA did not take the chain within the wait budget.
    Timeout,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyFragments(n) => write!(f, "too many fragments ({})", n),
            Self::FrameTooShort => write!(f, "frame shorter than MAC header"),
            Self::FragmentTooLarge => write!(f, "fragment larger than a page"),
            Self::EmptyFragment => write!(f, "empty fragment"),
            Self::Timeout => write!(f, "SDMA did not take the descriptors"),
        }
    }
}

/// Runs the device's poll routine outside interrupt context.
///
/// The interrupt worker calls [`schedule`](Self::schedule) with RX interrupts
/// masked; the host later calls `SdmaDevice::poll`, which calls
/// [`complete`](Self::complete) once the rings are drained and only then
/// unmasks interrupts.
pub trait PollScheduler: Send + Sync {
    /// Request a poll.
    ///
    /// # Returns
    /// - `true`: a poll was newly scheduled
    /// - `false`: a poll was already pending or scheduling is disabled
    ///
    /// # Contract
    /// - MUST be idempotent while a poll is pending
    /// - MUST NOT block
    fn schedule(&self) -> bool;

    /// The poll routine drained the rings.
    fn complete(&self);

    /// Allow scheduling. Called when the device opens.
    fn enable(&self);

    /// Forbid scheduling and drop a pending request. Called when the device
    /// stops, after any running poll has returned.
    fn disable(&self);
}

/// Source of hardware interrupt events.
pub trait InterruptSource: Send + Sync {
    /// Post `wake` once for every interrupt from now on.
    ///
    /// # Returns
    /// - `Err(SdmaError::IrqRegistration)`: the line could not be claimed
    fn register(&self, wake: Arc<WakeSignal>) -> Result<()>;

    /// Stop posting `wake`.
    fn unregister(&self, wake: &Arc<WakeSignal>);
}
