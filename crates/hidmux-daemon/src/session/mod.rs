//! Sessions: one reader's view of a device.
//!
//! Each session owns a private bounded ring that the device fills on every
//! delivery. Readers consume their own ring in FIFO order; a slow reader only
//! loses its own events.

mod handle;
pub(crate) mod state;
mod types;

pub use handle::Session;
pub(crate) use state::SessionState;
pub use types::{ReadMode, Readiness, SessionId, SessionSignal};
