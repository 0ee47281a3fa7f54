//! Event payloads handed from the report source to sessions.

use std::collections::TryReserveError;

/// One report as delivered by the device.
///
/// Each session receives its own copy; the bytes are never shared between
/// sessions, so one session consuming (or dropping) its copy leaves every
/// other session's copy untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    payload: Box<[u8]>,
}

impl Event {
    /// Copy `data` into a freshly allocated event.
    ///
    /// Allocation is fallible so that memory exhaustion during fan-out only
    /// costs the one session whose copy could not be made.
    pub fn copy_from(data: &[u8]) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())?;
        buf.extend_from_slice(data);
        Ok(Self {
            payload: buf.into_boxed_slice(),
        })
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrow the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the event, keeping at most `max_len` bytes.
    pub fn into_truncated(self, max_len: usize) -> Vec<u8> {
        let mut bytes = self.payload.into_vec();
        bytes.truncate(max_len);
        bytes
    }
}
