//! Driver error types

use core::fmt;

use dma_pool::DmaError;

use crate::config::ConfigError;
use crate::driver::traits::TxError;

pub type Result<T> = core::result::Result<T, SdmaError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdmaError {
    /// DMA memory could not be allocated or mapped.
    Dma(DmaError),
    /// A configuration parameter was rejected.
    Config(ConfigError),
    /// Operation needs the device to be down.
    DeviceBusy,
    /// Operation needs the device to be up.
    NotOpen,
    /// No TX queue configured.
    TxQueueUnset,
    /// No RX queue configured.
    RxQueuesUnset,
    /// No memory window configured for the given use.
    MemoryWindowUnset(&'static str),
    /// Windowed device without an iATU window selected.
    AtuWindowUnset,
    /// Streaming buffers need two memory windows but only one is configured.
    SecondWindowUnset,
    /// Transmit failed.
    Tx(TxError),
    /// Ring size is not a power of two.
    InvalidRingSize(usize),
    /// Interrupt source rejected the registration.
    IrqRegistration,
    /// The interrupt worker could not be started.
    WorkerSpawn,
    /// Bus-level failure during attach.
    Bus(&'static str),
    /// Device id is not one this driver handles.
    UnsupportedDevice(u16),
}

impl fmt::Display for SdmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dma(e) => write!(f, "DMA error: {}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::DeviceBusy => write!(f, "Device is up"),
            Self::NotOpen => write!(f, "Device is down"),
            Self::TxQueueUnset => write!(f, "TX queue is not set"),
            Self::RxQueuesUnset => write!(f, "RX queues are not set"),
            Self::MemoryWindowUnset(what) => write!(f, "{} memory window is not set", what),
            Self::AtuWindowUnset => write!(f, "iATU window is not set"),
            Self::SecondWindowUnset => {
                write!(f, "Memory windows set with one streaming window while two are needed")
            }
            Self::Tx(e) => write!(f, "Transmit failed: {}", e),
            Self::InvalidRingSize(n) => write!(f, "Invalid ring size {}", n),
            Self::IrqRegistration => write!(f, "Failed to register interrupt wake signal"),
            Self::WorkerSpawn => write!(f, "Failed to start interrupt worker"),
            Self::Bus(msg) => write!(f, "Bus error: {}", msg),
            Self::UnsupportedDevice(id) => write!(f, "Unsupported device 0x{:04x}", id),
        }
    }
}

impl std::error::Error for SdmaError {}

impl From<DmaError> for SdmaError {
    fn from(e: DmaError) -> Self {
        Self::Dma(e)
    }
}

impl From<TxError> for SdmaError {
    fn from(e: TxError) -> Self {
        Self::Tx(e)
    }
}

impl From<ConfigError> for SdmaError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
