//! Device identification types.

use std::fmt;

/// Largest report descriptor a device may expose.
pub const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

/// Stable small-integer position of a device in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hidmux{}", self.0)
    }
}

/// Bus the device hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Usb,
    Bluetooth,
    I2c,
    Virtual,
    Other(u16),
}

impl BusType {
    /// Numeric bus code as used by Linux `input.h`.
    pub const fn code(self) -> u16 {
        match self {
            Self::Usb => 0x03,
            Self::Bluetooth => 0x05,
            Self::Virtual => 0x06,
            Self::I2c => 0x18,
            Self::Other(code) => code,
        }
    }
}

/// Answer to the raw-info identification query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub bus: BusType,
    pub vendor: u16,
    pub product: u16,
}

/// Everything the report source knows about a device at attach time.
///
/// Fixed for the device's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub info: DeviceInfo,
    pub name: String,
    pub phys: String,
    pub report_descriptor: Vec<u8>,
    pub serial: Option<String>,
}

impl DeviceDescriptor {
    /// Descriptor with an empty name, phys and report descriptor.
    pub fn new(bus: BusType, vendor: u16, product: u16) -> Self {
        Self {
            info: DeviceInfo {
                bus,
                vendor,
                product,
            },
            name: String::new(),
            phys: String::new(),
            report_descriptor: Vec::new(),
            serial: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_phys(mut self, phys: impl Into<String>) -> Self {
        self.phys = phys.into();
        self
    }

    #[must_use]
    pub fn with_report_descriptor(mut self, rdesc: Vec<u8>) -> Self {
        self.report_descriptor = rdesc;
        self
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Clamp the serial to `max_len - 1` bytes on a char boundary; drop it if empty.
    pub(crate) fn normalize_serial(&mut self, max_len: usize) {
        let Some(serial) = self.serial.as_mut() else {
            return;
        };
        let limit = max_len.saturating_sub(1);
        if serial.len() > limit {
            let mut cut = limit;
            while !serial.is_char_boundary(cut) {
                cut -= 1;
            }
            serial.truncate(cut);
        }
        if serial.is_empty() {
            self.serial = None;
        }
    }
}
