//! The report source seen from the multiplexer.
//!
//! Protocol decoding and the physical link live behind [`ReportTransport`];
//! the multiplexer only ever asks it to push a report out or pull one in,
//! always from inside a device's control lock.

pub mod sim;

use async_trait::async_trait;

use crate::control::ReportKind;

pub use sim::SimulatedTransport;

/// Failures reported by the transport itself.
///
/// These are passed to the caller unchanged; control transactions are not
/// assumed idempotent, so nothing here is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Device does not support this report type")]
    Unsupported,

    #[error("Device rejected the request (status {status})")]
    Rejected { status: i32 },

    #[error("Device link is down")]
    Disconnected,

    #[error("Transaction timed out")]
    Timeout,
}

/// Synchronous request/response access to one physical device.
#[async_trait]
pub trait ReportTransport: Send + Sync + 'static {
    /// Send a report. `report[0]` is the report number.
    ///
    /// Returns the number of bytes the device accepted.
    async fn send_report(&self, report: &[u8], kind: ReportKind) -> Result<usize, TransportError>;

    /// Fetch report `report_id` into a buffer of at most `len` bytes.
    async fn get_report(
        &self,
        report_id: u8,
        len: usize,
        kind: ReportKind,
    ) -> Result<Vec<u8>, TransportError>;
}
