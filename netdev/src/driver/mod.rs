//! SDMA network device.
//!
//! - `device`: device context, open/stop and the data path entry points
//! - `rx` / `tx`: ring pipelines
//! - `irq`: interrupt worker and wake signal
//! - `traits`: platform seams

pub mod device;
pub mod irq;
pub mod rx;
pub mod traits;
pub mod tx;

pub use device::{DeviceResources, SdmaDevice};
pub use irq::{PollState, WakeSignal};
pub use rx::RxPath;
pub use traits::{InterruptSource, PollScheduler, TxError};
pub use tx::{TxFrame, TxPath, TxTag};
