//! Periodic diagnostics for the primary device.
//!
//! The most recently attached device is the primary device. While it has at
//! least one open session a background task wakes every
//! [`MonitorConfig::interval`], asks the device for its telemetry feature
//! report, and logs the device-wide event rate plus per-session read
//! activity. The task is armed by the first open and cancelled by the last
//! close, so an idle device causes no wakeups.

use std::sync::Weak;
use std::time::Instant;

use hidmux_core::MonitorConfig;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{ControlRequest, ControlResponse};
use crate::device::SlotId;
use crate::multiplexer::Shared;
use crate::session::SessionId;

/// Read activity of one session on the primary device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEntry {
    pub session: SessionId,
    /// Events read since the previous monitor tick.
    pub delivered: u64,
    pub last_active: Instant,
    pub owner: String,
}

/// Decoded telemetry feature report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub timestamp: u32,
    pub sensor: u32,
    pub pui: u32,
    pub proximity: u8,
    pub main_loop: u8,
    pub status: [u8; 6],
}

impl DiagnosticReport {
    pub const LEN: usize = 24;

    /// Decode a report; `None` if it is shorter than [`Self::LEN`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf: &[u8; Self::LEN] = buf.get(..Self::LEN)?.try_into().ok()?;
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let mut status = [0u8; 6];
        status.copy_from_slice(&buf[18..24]);
        Some(Self {
            timestamp: word(4),
            sensor: word(8),
            pui: word(12),
            proximity: buf[16],
            main_loop: buf[17],
            status,
        })
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorState {
    primary: Option<SlotId>,
    entries: Vec<Option<MonitorEntry>>,
    task: Option<MonitorTask>,
}

/// Monitor table plus the armed task. Lock order: table lock, then this.
pub(crate) struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let entries = (0..config.max_entries).map(|_| None).collect();
        Self {
            config,
            state: Mutex::new(MonitorState {
                primary: None,
                entries,
                task: None,
            }),
        }
    }

    pub fn primary(&self) -> Option<SlotId> {
        self.state.lock().primary
    }

    pub fn is_primary(&self, slot: SlotId) -> bool {
        self.primary() == Some(slot)
    }

    /// Make `slot` the primary device; forget all activity of the previous one.
    pub fn designate(&self, slot: SlotId) {
        let mut state = self.state.lock();
        state.primary = Some(slot);
        state.entries.iter_mut().for_each(|e| *e = None);
        Self::cancel(&mut state);
    }

    /// Drop the primary designation if `slot` holds it.
    pub fn clear_primary(&self, slot: SlotId) {
        let mut state = self.state.lock();
        if state.primary == Some(slot) {
            state.primary = None;
            Self::cancel(&mut state);
        }
    }

    /// Start tracking a session. Returns false if the table is full.
    pub fn register(&self, session: SessionId, owner: &str) -> bool {
        let mut state = self.state.lock();
        let Some(free) = state.entries.iter_mut().find(|e| e.is_none()) else {
            debug!(session_id = %session, "Monitor table full, session not tracked");
            return false;
        };
        *free = Some(MonitorEntry {
            session,
            delivered: 0,
            last_active: Instant::now(),
            owner: owner.to_string(),
        });
        true
    }

    pub fn unregister(&self, session: SessionId) {
        let mut state = self.state.lock();
        if let Some(slot) = state
            .entries
            .iter_mut()
            .find(|e| e.as_ref().is_some_and(|e| e.session == session))
        {
            *slot = None;
        }
    }

    /// Count one successful read.
    pub fn record_read(&self, session: SessionId) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .flatten()
            .find(|e| e.session == session)
        {
            entry.delivered += 1;
            entry.last_active = Instant::now();
        }
    }

    pub fn entries(&self) -> Vec<MonitorEntry> {
        self.state.lock().entries.iter().flatten().cloned().collect()
    }

    /// Snapshot every entry and zero its delivered count.
    fn take_entries(&self) -> Vec<MonitorEntry> {
        let mut state = self.state.lock();
        state
            .entries
            .iter_mut()
            .flatten()
            .map(|entry| {
                let snapshot = entry.clone();
                entry.delivered = 0;
                snapshot
            })
            .collect()
    }

    pub fn is_armed(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Start the periodic task, replacing any previous one.
    pub fn arm(&self, runtime: &Handle, shared: Weak<Shared>) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock();
        Self::cancel(&mut state);
        let cancel = CancellationToken::new();
        let handle = spawn_monitor_task(runtime, shared, self.config.interval(), cancel.clone());
        state.task = Some(MonitorTask { cancel, handle });
        drop(state);
        debug!(interval_ms = self.config.interval_ms, "Monitor armed");
    }

    pub fn disarm(&self) {
        let mut state = self.state.lock();
        if Self::cancel(&mut state) {
            debug!("Monitor disarmed");
        }
    }

    fn cancel(state: &mut MonitorState) -> bool {
        state.task.take().is_some_and(|task| {
            task.cancel.cancel();
            true
        })
    }

    fn diagnostic_request(&self) -> ControlRequest {
        ControlRequest::get_feature(
            self.config.diagnostic_report_id,
            self.config.diagnostic_report_len,
        )
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        Self::cancel(self.state.get_mut());
    }
}

/// Wait `interval`, run one tick, repeat. The delay starts after each tick
/// completes, so a slow device never causes back-to-back ticks. Cancelling
/// also abandons a tick in flight.
fn spawn_monitor_task(
    runtime: &Handle,
    shared: Weak<Shared>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => return,
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            match cancel.run_until_cancelled(tick(&shared)).await {
                Some(true) => {}
                Some(false) => {
                    debug!("Primary device idle, monitor stopping");
                    return;
                }
                None => return,
            }
        }
    })
}

/// One monitor pass. Returns false once the primary device has no sessions.
async fn tick(shared: &Shared) -> bool {
    let Some(device) = shared.primary_device() else {
        return false;
    };
    let slot = device.slot();

    match device.control(&shared.monitor.diagnostic_request()).await {
        Ok(ControlResponse::Received(bytes)) => match DiagnosticReport::decode(&bytes) {
            Some(diag) => info!(
                slot = %slot,
                timestamp = format!("{:#010x}", diag.timestamp),
                sensor = format!("{:#010x}", diag.sensor),
                pui = format!("{:#010x}", diag.pui),
                proximity = diag.proximity,
                main_loop = format!("{:#04x}", diag.main_loop),
                status = ?diag.status,
                "Device telemetry"
            ),
            None => warn!(slot = %slot, len = bytes.len(), "Telemetry report too short"),
        },
        Ok(ControlResponse::Sent(_)) => {}
        Err(e) => warn!(slot = %slot, error = %e, "Telemetry request failed"),
    }

    let stats = device.take_event_stats();
    info!(
        slot = %slot,
        events = stats.events,
        since_last_event_ms = ?stats.last_event.map(|t| t.elapsed().as_millis()),
        "Event rate"
    );

    for entry in shared.monitor.take_entries() {
        info!(
            session_id = %entry.session,
            owner = %entry.owner,
            delivered = entry.delivered,
            idle_secs = entry.last_active.elapsed().as_secs(),
            "Session activity"
        );
    }
    true
}
