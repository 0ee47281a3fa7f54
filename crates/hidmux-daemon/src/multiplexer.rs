//! Device table and session lifecycle.
//!
//! The [`Multiplexer`] owns the device table. Attach, detach, open and close
//! all run under the table lock, so a device's existence and open count only
//! change while it is held. Delivery goes straight to the device and never
//! takes the table lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hidmux_core::{Config, MultiplexerConfig};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::device::{DeliveryReport, Device, DeviceDescriptor, DeviceHandle, DeviceTable, SlotId};
use crate::error::MuxError;
use crate::monitor::{Monitor, MonitorEntry};
use crate::session::{Session, SessionId, SessionState};
use crate::transport::ReportTransport;

/// Owner recorded for sessions opened through [`Multiplexer::open`].
const DEFAULT_OWNER: &str = "unknown";

/// Snapshot of multiplexer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Devices attached and not yet detached.
    pub attached_devices: usize,
    /// Open sessions across every device still in the table.
    pub open_sessions: usize,
    /// Devices freed since startup.
    pub devices_released: u64,
    /// Events dropped for full rings, over devices still in the table.
    pub events_dropped: u64,
    pub monitor_armed: bool,
}

/// State shared by the multiplexer, its sessions and the monitor task.
pub(crate) struct Shared {
    config: MultiplexerConfig,
    table: Mutex<DeviceTable>,
    pub(crate) monitor: Monitor,
    runtime: Handle,
    next_session: AtomicU64,
    released: AtomicU64,
}

impl Shared {
    /// The primary device, if it exists and has an open session.
    pub(crate) fn primary_device(&self) -> Option<Arc<Device>> {
        let table = self.table.lock();
        let slot = self.monitor.primary()?;
        table
            .get(slot)
            .filter(|d| d.exists() && d.open_count() > 0)
            .cloned()
    }

    /// Close path shared by [`Session::close`] and drop.
    pub(crate) fn release_session(&self, state: &Arc<SessionState>, slot: SlotId) {
        let mut table = self.table.lock();
        let Some(device) = table.get(slot).cloned() else {
            warn!(session_id = %state.id, slot = %slot, "Session closed after its device was freed");
            return;
        };

        let remaining = device.remove_session(state);
        self.monitor.unregister(state.id);
        if remaining == 0 && self.monitor.is_primary(slot) {
            self.monitor.disarm();
        }

        let freed = remaining == 0 && !device.exists();
        if freed {
            self.free_slot(&mut table, slot);
        }
        drop(table);

        let drained = state.drain();
        info!(
            session_id = %state.id,
            slot = %slot,
            remaining,
            drained,
            freed,
            "Session closed"
        );
    }

    fn free_slot(&self, table: &mut DeviceTable, slot: SlotId) {
        table.free(slot);
        self.released.fetch_add(1, Ordering::Relaxed);
        debug!(slot = %slot, "Device freed");
    }
}

/// Multiplexes each attached device's event stream across its sessions.
///
/// Cloning is cheap; every clone refers to the same device table.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    /// Build a multiplexer. The monitor task is spawned on `runtime`.
    pub fn new(config: &Config, runtime: Handle) -> Result<Self, MuxError> {
        config.validate()?;
        let shared = Shared {
            config: config.multiplexer.clone(),
            table: Mutex::new(DeviceTable::new(config.multiplexer.max_devices)),
            monitor: Monitor::new(config.monitor.clone()),
            runtime,
            next_session: AtomicU64::new(1),
            released: AtomicU64::new(0),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Install a device in the first free slot and make it the primary device.
    pub fn attach(
        &self,
        mut descriptor: DeviceDescriptor,
        transport: Arc<dyn ReportTransport>,
    ) -> Result<DeviceHandle, MuxError> {
        descriptor.normalize_serial(self.shared.config.max_serial_len);
        let info = descriptor.info;

        let mut table = self.shared.table.lock();
        let Some(slot) = table.first_free() else {
            let max = table.capacity();
            drop(table);
            warn!(max, "Device table full, attach refused");
            return Err(MuxError::NoFreeSlot { max });
        };
        let device = Arc::new(Device::new(
            slot,
            descriptor,
            transport,
            self.shared.config.max_report_size,
        ));
        table.install(Arc::clone(&device));
        self.shared.monitor.designate(slot);
        drop(table);

        info!(
            slot = %slot,
            bus = ?info.bus,
            vendor = format!("{:04x}", info.vendor),
            product = format!("{:04x}", info.product),
            "Device attached"
        );
        Ok(DeviceHandle::new(&device))
    }

    /// Mark a device gone. It is freed now if nobody has it open, otherwise
    /// when its last session closes.
    pub fn detach(&self, slot: SlotId) -> Result<(), MuxError> {
        let mut table = self.shared.table.lock();
        let device = table
            .get(slot)
            .filter(|d| d.exists())
            .cloned()
            .ok_or(MuxError::NoDevice { slot })?;

        self.shared.monitor.clear_primary(slot);
        device.mark_gone();
        let open = device.open_count();
        if open == 0 {
            self.shared.free_slot(&mut table, slot);
        }
        drop(table);

        info!(slot = %slot, open_sessions = open, deferred = open > 0, "Device detached");
        Ok(())
    }

    /// Handle to whatever occupies `slot`, detached-but-open devices included.
    pub fn lookup(&self, slot: SlotId) -> Option<DeviceHandle> {
        self.shared.table.lock().get(slot).map(DeviceHandle::new)
    }

    /// Deliver one event to every session of the device at `slot`.
    ///
    /// Report sources holding a [`DeviceHandle`] can call
    /// [`DeviceHandle::deliver`] instead and skip the table lookup.
    pub fn notify_event(&self, slot: SlotId, data: &[u8]) -> Result<DeliveryReport, MuxError> {
        let device = self
            .shared
            .table
            .lock()
            .get(slot)
            .cloned()
            .ok_or(MuxError::NoDevice { slot })?;
        Ok(device.deliver(data))
    }

    /// Open a session on the device at `slot`.
    pub fn open(&self, slot: SlotId) -> Result<Session, MuxError> {
        self.open_with_owner(slot, DEFAULT_OWNER)
    }

    /// Open a session; `owner` labels it in monitor output.
    pub fn open_with_owner(&self, slot: SlotId, owner: &str) -> Result<Session, MuxError> {
        let table = self.shared.table.lock();
        let Some(device) = table.get(slot).filter(|d| d.exists()).cloned() else {
            return Err(MuxError::NoDevice { slot });
        };

        let id = SessionId::new(self.shared.next_session.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(SessionState::new(id, self.shared.config.ring_capacity));
        let open = device.add_session(Arc::clone(&state));

        let monitor = &self.shared.monitor;
        if monitor.is_primary(slot) {
            monitor.register(id, owner);
            if open == 1 {
                monitor.arm(&self.shared.runtime, Arc::downgrade(&self.shared));
            }
        }
        drop(table);

        info!(session_id = %id, slot = %slot, owner, open_sessions = open, "Session opened");
        Ok(Session::new(state, &device, Arc::clone(&self.shared)))
    }

    /// Current primary device, if any.
    pub fn primary(&self) -> Option<SlotId> {
        self.shared.monitor.primary()
    }

    /// Sessions the monitor currently tracks on the primary device.
    pub fn monitor_entries(&self) -> Vec<MonitorEntry> {
        self.shared.monitor.entries()
    }

    /// Snapshot counters across the device table.
    pub fn stats(&self) -> MultiplexerStats {
        let table = self.shared.table.lock();
        let mut stats = MultiplexerStats {
            devices_released: self.shared.released.load(Ordering::Relaxed),
            ..MultiplexerStats::default()
        };
        for device in table.devices() {
            if device.exists() {
                stats.attached_devices += 1;
            }
            stats.open_sessions += device.open_count();
            stats.events_dropped += device.dropped_events();
        }
        drop(table);
        stats.monitor_armed = self.shared.monitor.is_armed();
        stats
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
