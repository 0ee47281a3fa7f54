//! Devices and the slot table that owns them.
//!
//! A device stays in its slot while it exists or while any session still
//! has it open; whichever of detach and last-close happens second frees it.

mod handle;
mod state;
mod table;
mod types;

pub use handle::DeviceHandle;
pub use state::{DeliveryReport, Device, EventStats};
pub(crate) use table::DeviceTable;
pub use types::{BusType, DeviceDescriptor, DeviceInfo, HID_MAX_DESCRIPTOR_SIZE, SlotId};
