//! Per-device state: session list, existence, wait condition, control path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::types::{DeviceDescriptor, SlotId};
use crate::control::{ControlOp, ControlRequest, ControlResponse};
use crate::error::MuxError;
use crate::session::{SessionSignal, SessionState};
use crate::session::state::Enqueue;
use crate::transport::ReportTransport;

/// Per-delivery fan-out tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sessions that received a copy.
    pub queued: usize,
    /// Sessions whose ring was full.
    pub dropped: usize,
    /// Sessions whose copy could not be allocated.
    pub failed: usize,
}

/// Device-wide event counter as read by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStats {
    /// Events received since the previous read.
    pub events: u64,
    pub last_event: Option<Instant>,
}

/// One attached physical device.
///
/// `exists` and `open_count` only change while the multiplexer's table lock
/// is held; they are atomics so readers and the delivery path can look at
/// them without that lock.
pub struct Device {
    slot: SlotId,
    descriptor: DeviceDescriptor,
    transport: Arc<dyn ReportTransport>,
    max_report: usize,
    exists: AtomicBool,
    open_count: AtomicUsize,
    /// The list lock. Held for a whole fan-out.
    sessions: Mutex<Vec<Arc<SessionState>>>,
    /// Broadcast by every delivery and by detach.
    wait: Notify,
    /// One control transaction in flight per device.
    control: tokio::sync::Mutex<()>,
    events: AtomicU64,
    last_event: Mutex<Option<Instant>>,
    dropped: AtomicU64,
}

impl Device {
    pub(crate) fn new(
        slot: SlotId,
        descriptor: DeviceDescriptor,
        transport: Arc<dyn ReportTransport>,
        max_report: usize,
    ) -> Self {
        Self {
            slot,
            descriptor,
            transport,
            max_report,
            exists: AtomicBool::new(true),
            open_count: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
            wait: Notify::new(),
            control: tokio::sync::Mutex::new(()),
            events: AtomicU64::new(0),
            last_event: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Slot this device occupies.
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Identification captured at attach time.
    pub const fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Whether the device is still attached.
    pub fn exists(&self) -> bool {
        self.exists.load(Ordering::Acquire)
    }

    /// Number of open sessions.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    /// Events dropped across all sessions because their ring was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Called with the table lock held. Returns the new open count.
    pub(crate) fn add_session(&self, session: Arc<SessionState>) -> usize {
        self.sessions.lock().push(session);
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Called with the table lock held. Returns the remaining open count.
    pub(crate) fn remove_session(&self, session: &Arc<SessionState>) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| !Arc::ptr_eq(s, session));
        let removed = before - sessions.len();
        drop(sessions);

        assert_eq!(removed, 1, "session {} released twice", session.id);
        self.open_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Called with the table lock held. Wakes every reader so it observes
    /// the hang-up.
    pub(crate) fn mark_gone(&self) {
        self.exists.store(false, Ordering::Release);
        for session in self.sessions.lock().iter() {
            session.signal(SessionSignal::HangUp);
        }
        self.wait.notify_waiters();
    }

    pub(crate) const fn wait_condition(&self) -> &Notify {
        &self.wait
    }

    /// Fan `data` out to every attached session.
    ///
    /// A session with a full ring loses this event; every other session is
    /// unaffected. Never blocks beyond the list lock.
    pub fn deliver(&self, data: &[u8]) -> DeliveryReport {
        self.events.fetch_add(1, Ordering::Relaxed);
        *self.last_event.lock() = Some(Instant::now());

        let mut report = DeliveryReport::default();
        if !self.exists() {
            debug!(slot = %self.slot, "Dropping event for detached device");
            return report;
        }

        let sessions = self.sessions.lock();
        for session in sessions.iter() {
            match session.enqueue(data) {
                Enqueue::Queued => {
                    report.queued += 1;
                    session.signal(SessionSignal::Readable);
                }
                Enqueue::Full => report.dropped += 1,
                Enqueue::AllocFailed => report.failed += 1,
            }
        }
        drop(sessions);

        if report.dropped > 0 {
            self.dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
            debug!(slot = %self.slot, sessions = report.dropped, "Event dropped for lagging sessions");
        }
        if report.failed > 0 {
            warn!(slot = %self.slot, sessions = report.failed, "Event copy failed for some sessions");
        }

        self.wait.notify_waiters();
        report
    }

    /// Read and reset the device-wide event counter.
    pub fn take_event_stats(&self) -> EventStats {
        EventStats {
            events: self.events.swap(0, Ordering::Relaxed),
            last_event: *self.last_event.lock(),
        }
    }

    /// Run one control transaction under the control lock.
    pub(crate) async fn control(
        &self,
        request: &ControlRequest,
    ) -> Result<ControlResponse, MuxError> {
        if !self.exists() {
            return Err(MuxError::NoDevice { slot: self.slot });
        }
        request.validate(self.max_report)?;
        let wire = match request.op {
            ControlOp::Send => Some(request.wire_buffer()?),
            ControlOp::Get => None,
        };

        let _control = self.control.lock().await;
        // The device may have been detached while we waited for the lock.
        if !self.exists() {
            return Err(MuxError::NoDevice { slot: self.slot });
        }

        let response = match wire {
            Some(buf) => {
                let written = self.transport.send_report(&buf, request.kind).await?;
                ControlResponse::Sent(written)
            }
            None => {
                let mut bytes = self
                    .transport
                    .get_report(request.report_id, request.len(), request.kind)
                    .await?;
                bytes.truncate(request.len());
                ControlResponse::Received(bytes)
            }
        };
        debug!(slot = %self.slot, op = ?request.op, kind = ?request.kind, report_id = request.report_id, "Control transaction complete");
        Ok(response)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("slot", &self.slot)
            .field("exists", &self.exists())
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}
