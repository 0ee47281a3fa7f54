//! Multiplexer error taxonomy.

use crate::device::SlotId;
use crate::transport::TransportError;

/// Errors returned by multiplexer operations.
///
/// Every fallible operation on [`Multiplexer`](crate::Multiplexer),
/// [`DeviceHandle`](crate::DeviceHandle) and [`Session`](crate::Session)
/// reports through this type; none of them panic on these conditions.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("No free device slot (max: {max})")]
    NoFreeSlot { max: usize },

    #[error("No device at slot {slot}")]
    NoDevice { slot: SlotId },

    #[error("Device at slot {slot} is gone")]
    Gone { slot: SlotId },

    #[error("Operation would block")]
    WouldBlock,

    #[error("Interrupted while waiting for data")]
    Interrupted,

    #[error("Invalid length {len} (allowed: {min}..={max})")]
    InvalidLength { len: usize, min: usize, max: usize },

    #[error("Failed to allocate {bytes} bytes")]
    AllocationFailure { bytes: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] hidmux_core::Error),
}

impl MuxError {
    /// Whether the error means the device has left (or never was there).
    pub const fn is_device_missing(&self) -> bool {
        matches!(self, Self::NoDevice { .. } | Self::Gone { .. })
    }
}
