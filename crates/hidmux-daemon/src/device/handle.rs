//! Report-source side handle to an attached device.

use std::sync::{Arc, Weak};

use super::state::{DeliveryReport, Device};
use super::types::SlotId;

/// Non-owning reference to a device, handed to the report source by
/// [`Multiplexer::attach`](crate::Multiplexer::attach).
///
/// Holding a handle never keeps the device alive: once the device has been
/// detached and its last session closed, [`deliver`](Self::deliver) becomes
/// a no-op and [`is_released`](Self::is_released) turns true.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    slot: SlotId,
    device: Weak<Device>,
}

impl DeviceHandle {
    pub(crate) fn new(device: &Arc<Device>) -> Self {
        Self {
            slot: device.slot(),
            device: Arc::downgrade(device),
        }
    }

    /// Slot of the device.
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Fan an event out to the device's sessions without touching the table lock.
    pub fn deliver(&self, data: &[u8]) -> DeliveryReport {
        self.device
            .upgrade()
            .map(|device| device.deliver(data))
            .unwrap_or_default()
    }

    /// Whether the device is still attached.
    pub fn exists(&self) -> bool {
        self.device.upgrade().is_some_and(|d| d.exists())
    }

    /// Number of open sessions; zero once released.
    pub fn open_count(&self) -> usize {
        self.device.upgrade().map_or(0, |d| d.open_count())
    }

    /// Whether the device has been freed.
    pub fn is_released(&self) -> bool {
        self.device.strong_count() == 0
    }
}
