//! hidmux Daemon Library
//!
//! Fans the input report stream of each attached HID device out to any
//! number of independent reader sessions:
//! - Device table with deferred release of detached devices
//! - Per-session bounded event rings with drop-newest overflow
//! - Blocking, non-blocking and cancellable reads
//! - Serialized control transactions per device
//! - Periodic diagnostics for the primary device

pub mod control;
pub mod device;
pub mod error;
pub mod event;
pub mod monitor;
pub mod multiplexer;
pub mod ring;
pub mod session;
pub mod transport;

pub use control::{ControlOp, ControlRequest, ControlResponse, ReportKind};
pub use device::{BusType, DeliveryReport, DeviceDescriptor, DeviceHandle, DeviceInfo, SlotId};
pub use error::MuxError;
pub use monitor::{DiagnosticReport, MonitorEntry};
pub use multiplexer::{Multiplexer, MultiplexerStats};
pub use session::{ReadMode, Readiness, Session, SessionId, SessionSignal};
pub use transport::{ReportTransport, SimulatedTransport, TransportError};
