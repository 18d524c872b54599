//! PCI attach and detach.
//!
//! ```text
//! probe:  enable ─> check BAR0/BAR2 are memory ─> request regions
//!         ─> 32-bit DMA mask ─> bus master ─> map BAR0, BAR2 ─> device
//! remove: stop device ─> clear bus master ─> release regions ─> disable
//! ```
//!
//! A failing probe step undoes the steps before it in reverse order.

use std::sync::Arc;

use crate::dma::SharedDmaPlatform;
use crate::driver::{DeviceResources, InterruptSource, PollScheduler, SdmaDevice};
use crate::error::{Result, SdmaError};
use crate::hw::variant::{PCI_DEVICE_ID_ALDRIN2, PCI_DEVICE_ID_FALCON, PCI_VENDOR_ID_MARVELL};
use crate::hw::{DeviceVariant, MmioRegion};
use crate::stack::HostStack;
use crate::time::Clock;

/// BAR holding the iATU registers.
pub const BAR_ATU: u8 = 0;
/// BAR holding the switch registers.
pub const BAR_SWITCH: u8 = 2;
/// The SDMA only handles 32-bit bus addresses.
pub const DMA_MASK_BITS: u8 = 32;

/// `(vendor, device)` pairs this driver binds to.
pub const SUPPORTED_DEVICES: [(u16, u16); 2] = [
    (PCI_VENDOR_ID_MARVELL, PCI_DEVICE_ID_FALCON),
    (PCI_VENDOR_ID_MARVELL, PCI_DEVICE_ID_ALDRIN2),
];

pub fn supports_device(vendor: u16, device: u16) -> bool {
    SUPPORTED_DEVICES.contains(&(vendor, device))
}

/// One PCI function as the bus driver exposes it.
pub trait PciFunction: Send + Sync {
    fn vendor_id(&self) -> u16;
    fn device_id(&self) -> u16;

    fn enable(&self) -> Result<()>;
    fn disable(&self);

    /// Whether `bar` decodes memory (as opposed to I/O) space.
    fn bar_is_memory(&self, bar: u8) -> bool;

    fn request_regions(&self) -> Result<()>;
    fn release_regions(&self);

    /// Restrict DMA addresses to `bits` bits.
    fn set_dma_mask(&self, bits: u8) -> Result<()>;

    fn set_bus_master(&self, enable: bool);

    /// Map `bar` into the CPU address space.
    fn map_bar(&self, bar: u8) -> Result<Arc<dyn MmioRegion>>;
}

/// Host services handed to every probed device.
#[derive(Clone)]
pub struct PlatformServices {
    pub dma: SharedDmaPlatform,
    pub host: Arc<dyn HostStack>,
    pub scheduler: Arc<dyn PollScheduler>,
    pub interrupts: Arc<dyn InterruptSource>,
    pub clock: Arc<dyn Clock>,
}

/// A probed device and the function it is bound to.
pub struct AttachedDevice {
    pci: Arc<dyn PciFunction>,
    device: Arc<SdmaDevice>,
}

impl AttachedDevice {
    pub fn device(&self) -> &Arc<SdmaDevice> {
        &self.device
    }
}

/// Bind to `pci` and create its network device.
pub fn probe(pci: Arc<dyn PciFunction>, services: PlatformServices) -> Result<AttachedDevice> {
    let (vendor, device_id) = (pci.vendor_id(), pci.device_id());
    log::debug!("probe: vendor 0x{:04x}, device 0x{:04x}", vendor, device_id);

    if !supports_device(vendor, device_id) {
        return Err(SdmaError::UnsupportedDevice(device_id));
    }
    let variant =
        DeviceVariant::from_device_id(device_id).ok_or(SdmaError::UnsupportedDevice(device_id))?;

    pci.enable().map_err(|e| {
        log::error!("failed to enable PCI device");
        e
    })?;

    if !pci.bar_is_memory(BAR_ATU) || !pci.bar_is_memory(BAR_SWITCH) {
        log::error!("invalid PCI resource type");
        pci.disable();
        return Err(SdmaError::Bus("BAR0 and BAR2 must be memory BARs"));
    }

    if let Err(e) = pci.request_regions() {
        log::error!("failed to request regions");
        pci.disable();
        return Err(e);
    }

    if let Err(e) = pci.set_dma_mask(DMA_MASK_BITS) {
        log::error!("failed to set 32-bit DMA mask");
        pci.release_regions();
        pci.disable();
        return Err(e);
    }

    pci.set_bus_master(true);

    let bars = pci
        .map_bar(BAR_ATU)
        .and_then(|bar0| Ok((bar0, pci.map_bar(BAR_SWITCH)?)));
    let (bar0, bar2) = match bars {
        Ok(bars) => bars,
        Err(e) => {
            log::error!("failed to map BARs");
            pci.set_bus_master(false);
            pci.release_regions();
            pci.disable();
            return Err(e);
        }
    };

    let device = SdmaDevice::new(
        variant,
        DeviceResources {
            bar0,
            bar2,
            dma: services.dma,
            host: services.host,
            scheduler: services.scheduler,
            interrupts: services.interrupts,
            clock: services.clock,
        },
    );

    log::info!("probed {:?} device 0x{:04x}", variant, device_id);

    Ok(AttachedDevice {
        pci,
        device: Arc::new(device),
    })
}

/// Stop the device and release the PCI function.
pub fn remove(attached: AttachedDevice) {
    let AttachedDevice { pci, device } = attached;

    if device.is_up() {
        if let Err(e) = device.stop() {
            log::warn!("stop during remove: {}", e);
        }
    }
    drop(device);

    pci.set_bus_master(false);
    pci.release_regions();
    pci.disable();

    log::info!("detached from device");
}
