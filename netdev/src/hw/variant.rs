//! Supported device variants.

/// Marvell PCI vendor id.
pub const PCI_VENDOR_ID_MARVELL: u16 = 0x11AB;
/// Falcon family: registers reached through iATU windows.
pub const PCI_DEVICE_ID_FALCON: u16 = 0x8400;
/// Aldrin2: registers mapped flat into BAR2.
pub const PCI_DEVICE_ID_ALDRIN2: u16 = 0xCC0F;

/// Default iATU window on windowed devices.
pub const DEFAULT_ATU_WIN: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    /// BAR2 is a movable 1MB slice selected through BAR0.
    Windowed,
    /// BAR2 maps the switch registers directly.
    Flat,
}

impl DeviceVariant {
    /// Variant for a PCI device id, `None` for devices this driver does not
    /// handle.
    pub fn from_device_id(device: u16) -> Option<Self> {
        match device {
            PCI_DEVICE_ID_FALCON => Some(Self::Windowed),
            PCI_DEVICE_ID_ALDRIN2 => Some(Self::Flat),
            _ => None,
        }
    }

    pub fn is_windowed(self) -> bool {
        self == Self::Windowed
    }

    /// iATU window selected at attach.
    pub fn default_atu_window(self) -> Option<u8> {
        match self {
            Self::Windowed => Some(DEFAULT_ATU_WIN),
            Self::Flat => None,
        }
    }

    /// Memory window target attribute.
    pub fn mg_target(self) -> u32 {
        match self {
            Self::Windowed => 0xE03,
            Self::Flat => 0xE04,
        }
    }

    /// Memory window control word for a window at `base`.
    pub fn mg_control(self, base: u32) -> u32 {
        match self {
            Self::Windowed => base | 0xE,
            Self::Flat => 0x6,
        }
    }
}
