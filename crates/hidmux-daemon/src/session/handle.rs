//! Public session handle returned by [`Multiplexer::open`](crate::Multiplexer::open).

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::SessionState;
use super::types::{ReadMode, Readiness, SessionId, SessionSignal};
use crate::control::{ControlRequest, ControlResponse};
use crate::device::{Device, DeviceInfo, HID_MAX_DESCRIPTOR_SIZE, SlotId};
use crate::error::MuxError;
use crate::multiplexer::Shared;

/// An open session on one device.
///
/// Dropping the handle closes the session; [`close`](Self::close) does the
/// same explicitly. The session never keeps its device alive on its own: the
/// device stays in the table because its open count is non-zero.
pub struct Session {
    state: Arc<SessionState>,
    device: Weak<Device>,
    slot: SlotId,
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(state: Arc<SessionState>, device: &Arc<Device>, shared: Arc<Shared>) -> Self {
        Self {
            state,
            device: Arc::downgrade(device),
            slot: device.slot(),
            shared,
        }
    }

    /// Session identity.
    pub fn id(&self) -> SessionId {
        self.state.id
    }

    /// Slot of the device this session is bound to.
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Events currently queued for this session.
    pub fn queued(&self) -> usize {
        self.state.queued()
    }

    /// Events this session lost because its ring was full.
    pub fn dropped_events(&self) -> u64 {
        self.state.dropped()
    }

    /// Read the oldest queued event, truncated to `max_len` bytes.
    ///
    /// With [`ReadMode::Blocking`] an empty ring waits until an event is
    /// delivered or the device goes away. Dropping the returned future
    /// abandons the wait without losing any queued event.
    pub async fn read(&self, max_len: usize, mode: ReadMode) -> Result<Vec<u8>, MuxError> {
        self.read_inner(max_len, mode, None).await
    }

    /// Blocking read that returns [`MuxError::Interrupted`] once `cancel` fires.
    pub async fn read_cancellable(
        &self,
        max_len: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MuxError> {
        self.read_inner(max_len, ReadMode::Blocking, Some(cancel))
            .await
    }

    async fn read_inner(
        &self,
        max_len: usize,
        mode: ReadMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, MuxError> {
        loop {
            let Some(device) = self.device.upgrade() else {
                return Err(MuxError::Gone { slot: self.slot });
            };
            let reader = self.state.read_lock.lock().await;

            // Register for the broadcast before checking, so a delivery
            // between the check and the await still wakes us.
            let notified = device.wait_condition().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.state.dequeue() {
                drop(reader);
                self.shared.monitor.record_read(self.state.id);
                return Ok(event.into_truncated(max_len));
            }
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(MuxError::Interrupted);
            }
            if !device.exists() {
                return Err(MuxError::Gone { slot: self.slot });
            }
            if mode == ReadMode::NonBlocking {
                return Err(MuxError::WouldBlock);
            }

            drop(reader);
            match cancel {
                Some(token) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = token.cancelled() => return Err(MuxError::Interrupted),
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Readiness consistent with what [`read`](Self::read) would do now.
    pub fn poll_ready(&self) -> Readiness {
        if self.state.has_data() {
            Readiness::Readable
        } else if !self.device.upgrade().is_some_and(|d| d.exists()) {
            Readiness::HangUp
        } else {
            Readiness::NotReady
        }
    }

    /// Run one control transaction on the device.
    pub async fn send_request(&self, request: ControlRequest) -> Result<ControlResponse, MuxError> {
        let device = self.live_device()?;
        device.control(&request).await
    }

    /// Send an output report; `report[0]` is the report number.
    pub async fn write(&self, report: &[u8]) -> Result<usize, MuxError> {
        match self.send_request(ControlRequest::output(report)).await? {
            ControlResponse::Sent(n) => Ok(n),
            ControlResponse::Received(bytes) => Ok(bytes.len()),
        }
    }

    /// Bus type, vendor and product ids.
    pub fn device_info(&self) -> Result<DeviceInfo, MuxError> {
        Ok(self.live_device()?.descriptor().info)
    }

    /// Length of the report descriptor in bytes.
    pub fn report_descriptor_size(&self) -> Result<usize, MuxError> {
        Ok(self.live_device()?.descriptor().report_descriptor.len())
    }

    /// Up to `len` bytes of the report descriptor.
    pub fn report_descriptor(&self, len: usize) -> Result<Vec<u8>, MuxError> {
        let max = HID_MAX_DESCRIPTOR_SIZE - 1;
        if len > max {
            return Err(MuxError::InvalidLength { len, min: 0, max });
        }
        let device = self.live_device()?;
        let rdesc = &device.descriptor().report_descriptor;
        Ok(rdesc[..len.min(rdesc.len())].to_vec())
    }

    /// Device name, truncated to `max_len` bytes.
    pub fn raw_name(&self, max_len: usize) -> Result<Vec<u8>, MuxError> {
        let device = self.live_device()?;
        Ok(truncated(device.descriptor().name.as_bytes(), max_len))
    }

    /// Physical path, truncated to `max_len` bytes.
    pub fn raw_phys(&self, max_len: usize) -> Result<Vec<u8>, MuxError> {
        let device = self.live_device()?;
        Ok(truncated(device.descriptor().phys.as_bytes(), max_len))
    }

    /// Serial number captured at attach time.
    pub fn serial_number(&self) -> Result<Option<String>, MuxError> {
        Ok(self.live_device()?.descriptor().serial.clone())
    }

    /// Subscribe to [`SessionSignal`]s. Replaces any earlier subscription.
    ///
    /// Signals that do not fit in `capacity` are lost; the ring itself is
    /// unaffected.
    pub fn enable_notifications(&self, capacity: usize) -> mpsc::Receiver<SessionSignal> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.state.register_notify(tx);
        debug!(session_id = %self.state.id, "Notifications enabled");
        rx
    }

    /// Returns whether a subscription was active.
    pub fn disable_notifications(&self) -> bool {
        self.state.unregister_notify()
    }

    /// Close the session. Equivalent to dropping it.
    pub fn close(self) {
        drop(self);
    }

    fn live_device(&self) -> Result<Arc<Device>, MuxError> {
        self.device
            .upgrade()
            .filter(|d| d.exists())
            .ok_or(MuxError::NoDevice { slot: self.slot })
    }
}

fn truncated(bytes: &[u8], max_len: usize) -> Vec<u8> {
    bytes[..max_len.min(bytes.len())].to_vec()
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.release_session(&self.state, self.slot);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.state.id)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
