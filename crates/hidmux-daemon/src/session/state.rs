//! Per-session state shared between the device (producer) and the reader.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use super::types::{SessionId, SessionSignal};
use crate::event::Event;
use crate::ring::{EventRing, RingFull};

/// Outcome of queueing one event into one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Queued,
    /// Ring full; the new event was dropped for this session only.
    Full,
    /// The session's copy could not be allocated.
    AllocFailed,
}

/// Session state referenced by the device's session list.
pub(crate) struct SessionState {
    pub id: SessionId,
    /// Ring indices; taken briefly by delivery and by the reader.
    ring: Mutex<EventRing>,
    /// Serializes readers of this session. Delivery never takes it.
    pub read_lock: tokio::sync::Mutex<()>,
    /// Async notification registration, if any.
    notify: Mutex<Option<mpsc::Sender<SessionSignal>>>,
    dropped: AtomicU64,
}

impl SessionState {
    pub fn new(id: SessionId, ring_capacity: usize) -> Self {
        Self {
            id,
            ring: Mutex::new(EventRing::new(ring_capacity)),
            read_lock: tokio::sync::Mutex::new(()),
            notify: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a private copy of `data`. Never blocks beyond the ring mutex.
    pub fn enqueue(&self, data: &[u8]) -> Enqueue {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            drop(ring);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Enqueue::Full;
        }
        let Ok(event) = Event::copy_from(data) else {
            drop(ring);
            warn!(session_id = %self.id, len = data.len(), "No memory for event copy");
            return Enqueue::AllocFailed;
        };
        match ring.push(event) {
            Ok(()) => Enqueue::Queued,
            Err(RingFull(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Full
            }
        }
    }

    pub fn dequeue(&self) -> Option<Event> {
        self.ring.lock().pop()
    }

    pub fn has_data(&self) -> bool {
        !self.ring.lock().is_empty()
    }

    pub fn queued(&self) -> usize {
        self.ring.lock().len()
    }

    /// Free every queued event.
    pub fn drain(&self) -> usize {
        self.ring.lock().clear()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn register_notify(&self, tx: mpsc::Sender<SessionSignal>) {
        *self.notify.lock() = Some(tx);
    }

    pub fn unregister_notify(&self) -> bool {
        self.notify.lock().take().is_some()
    }

    /// Push `signal` to the registered listener without waiting.
    ///
    /// A full channel loses the signal; a closed one unregisters itself.
    pub fn signal(&self, signal: SessionSignal) {
        let mut notify = self.notify.lock();
        if let Some(tx) = notify.as_ref()
            && let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(signal)
        {
            *notify = None;
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("queued", &self.queued())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}
