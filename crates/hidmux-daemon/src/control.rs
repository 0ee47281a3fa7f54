//! Control-channel requests.
//!
//! A control request is one synchronous transaction against the device's
//! control resource. Requests from every session of a device are serialized
//! by that device's control lock (see [`Device::control`]).
//!
//! [`Device::control`]: crate::device::Device

use crate::error::MuxError;

/// Smallest report a control transaction accepts: report number plus one byte.
pub const MIN_REPORT_LEN: usize = 2;

/// HID report class a transaction addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// Direction of a control transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Send,
    Get,
}

/// One control transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub op: ControlOp,
    pub kind: ReportKind,
    pub report_id: u8,
    /// For `Send`: the bytes following the report number. Empty for `Get`.
    payload: Vec<u8>,
    /// Total buffer length on the wire, report number included.
    len: usize,
}

/// Result of a control transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// Bytes accepted by the device.
    Sent(usize),
    /// Report returned by the device, at most the requested length.
    Received(Vec<u8>),
}

impl ControlRequest {
    /// Send `data` as report `report_id`; the wire buffer is `[report_id, data..]`.
    pub fn send(kind: ReportKind, report_id: u8, data: &[u8]) -> Self {
        Self {
            op: ControlOp::Send,
            kind,
            report_id,
            payload: data.to_vec(),
            len: data.len() + 1,
        }
    }

    /// Fetch report `report_id` into a buffer of `len` bytes (report number included).
    pub const fn get(kind: ReportKind, report_id: u8, len: usize) -> Self {
        Self {
            op: ControlOp::Get,
            kind,
            report_id,
            payload: Vec::new(),
            len,
        }
    }

    /// Send a feature report.
    pub fn send_feature(report_id: u8, data: &[u8]) -> Self {
        Self::send(ReportKind::Feature, report_id, data)
    }

    /// Fetch a feature report.
    pub const fn get_feature(report_id: u8, len: usize) -> Self {
        Self::get(ReportKind::Feature, report_id, len)
    }

    /// Output report written through the session's data path.
    ///
    /// `report[0]` is the report number, as it is on the wire.
    pub fn output(report: &[u8]) -> Self {
        match report.split_first() {
            Some((&id, data)) => Self::send(ReportKind::Output, id, data),
            None => Self {
                op: ControlOp::Send,
                kind: ReportKind::Output,
                report_id: 0,
                payload: Vec::new(),
                len: 0,
            },
        }
    }

    /// Buffer length on the wire.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the wire buffer is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check the wire length against `[MIN_REPORT_LEN, max_report]`.
    pub fn validate(&self, max_report: usize) -> Result<(), MuxError> {
        if self.len < MIN_REPORT_LEN || self.len > max_report {
            return Err(MuxError::InvalidLength {
                len: self.len,
                min: MIN_REPORT_LEN,
                max: max_report,
            });
        }
        Ok(())
    }

    /// Assemble the wire buffer for a `Send`.
    pub(crate) fn wire_buffer(&self) -> Result<Vec<u8>, MuxError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.len)
            .map_err(|_| MuxError::AllocationFailure { bytes: self.len })?;
        buf.push(self.report_id);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}
