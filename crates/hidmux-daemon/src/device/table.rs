//! Fixed-size slot array mapping slot ids to devices.

use std::sync::Arc;

use super::state::Device;
use super::types::SlotId;

/// The slot array. Always accessed under the multiplexer's table lock.
#[derive(Debug)]
pub(crate) struct DeviceTable {
    slots: Vec<Option<Arc<Device>>>,
}

impl DeviceTable {
    pub fn new(max_devices: usize) -> Self {
        Self {
            slots: (0..max_devices).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest free slot, if any.
    pub fn first_free(&self) -> Option<SlotId> {
        self.slots.iter().position(Option::is_none).map(SlotId::new)
    }

    pub fn get(&self, slot: SlotId) -> Option<&Arc<Device>> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    /// Place `device` into its (free) slot.
    pub fn install(&mut self, device: Arc<Device>) {
        let entry = &mut self.slots[device.slot().index()];
        assert!(entry.is_none(), "slot {} already occupied", device.slot());
        *entry = Some(device);
    }

    /// Empty `slot`, returning the device it held.
    ///
    /// # Panics
    /// Freeing an empty slot is a lifecycle bug and aborts.
    #[allow(clippy::panic)]
    pub fn free(&mut self, slot: SlotId) -> Arc<Device> {
        match self.slots.get_mut(slot.index()).and_then(Option::take) {
            Some(device) => device,
            None => panic!("slot {slot} freed while empty"),
        }
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.slots.iter().flatten()
    }
}
