//! Session-facing types.

use std::fmt;

/// Identity of one open session, unique for the multiplexer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Answer to a readiness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one event is queued.
    Readable,
    /// Nothing queued and the device has gone away.
    HangUp,
    /// Nothing queued yet.
    NotReady,
}

/// Whether an empty read waits for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Asynchronous notification pushed to a session that asked for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// A new event was queued for this session.
    Readable,
    /// The device was detached.
    HangUp,
}
