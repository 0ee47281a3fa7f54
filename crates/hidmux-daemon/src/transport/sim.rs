//! In-process transport used by the daemon's simulation mode and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ReportTransport, TransportError};
use crate::control::ReportKind;

/// Feature report the simulated device answers with live telemetry.
pub const TELEMETRY_REPORT_ID: u8 = 0x31;
const TELEMETRY_REPORT_LEN: usize = 24;

/// Status code returned for a report the device does not know (EPIPE).
const STALL: i32 = -32;

/// A fake device: stores feature reports, records output reports, and
/// synthesises a telemetry report.
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    latency: Duration,
    started: Instant,
    transactions: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sensor_samples: AtomicU32,
}

#[derive(Default)]
struct SimState {
    feature_reports: HashMap<u8, Vec<u8>>,
    sent: Vec<(ReportKind, Vec<u8>)>,
    fail_next: Option<TransportError>,
}

impl SimulatedTransport {
    /// Create a device with no latency.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every transaction sleeps for `latency` while "on the wire".
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            latency,
            started: Instant::now(),
            transactions: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sensor_samples: AtomicU32::new(0),
        }
    }

    /// Preload a feature report returned by `get_report`.
    pub fn set_feature_report(&self, report_id: u8, bytes: Vec<u8>) {
        self.state.lock().feature_reports.insert(report_id, bytes);
    }

    /// Make the next transaction fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Reports received through `send_report`, oldest first.
    pub fn sent_reports(&self) -> Vec<(ReportKind, Vec<u8>)> {
        self.state.lock().sent.clone()
    }

    /// Number of transactions that reached the device.
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Acquire)
    }

    /// Highest number of transactions ever observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    /// Count one sensor sample; the telemetry report exposes the total.
    pub fn record_sample(&self) {
        self.sensor_samples.fetch_add(1, Ordering::Relaxed);
    }

    async fn begin(&self) -> Result<InFlight<'_>, TransportError> {
        self.transactions.fetch_add(1, Ordering::AcqRel);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.state.lock().fail_next.take() {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }

    fn telemetry(&self) -> Vec<u8> {
        let mut buf = vec![0u8; TELEMETRY_REPORT_LEN];
        buf[0] = TELEMETRY_REPORT_ID;
        let elapsed_ms = u32::try_from(self.started.elapsed().as_millis()).unwrap_or(u32::MAX);
        buf[4..8].copy_from_slice(&elapsed_ms.to_le_bytes());
        let samples = self.sensor_samples.load(Ordering::Relaxed);
        buf[8..12].copy_from_slice(&samples.to_le_bytes());
        buf
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl ReportTransport for SimulatedTransport {
    async fn send_report(&self, report: &[u8], kind: ReportKind) -> Result<usize, TransportError> {
        let _in_flight = self.begin().await?;
        if kind == ReportKind::Input {
            return Err(TransportError::Unsupported);
        }

        let mut state = self.state.lock();
        if kind == ReportKind::Feature
            && let Some(&id) = report.first()
        {
            state.feature_reports.insert(id, report.to_vec());
        }
        state.sent.push((kind, report.to_vec()));
        drop(state);

        debug!(?kind, len = report.len(), "Simulated device accepted report");
        Ok(report.len())
    }

    async fn get_report(
        &self,
        report_id: u8,
        len: usize,
        kind: ReportKind,
    ) -> Result<Vec<u8>, TransportError> {
        let _in_flight = self.begin().await?;
        if kind == ReportKind::Output {
            return Err(TransportError::Unsupported);
        }

        let stored = self.state.lock().feature_reports.get(&report_id).cloned();
        let mut report = match stored {
            Some(bytes) => bytes,
            None if report_id == TELEMETRY_REPORT_ID => self.telemetry(),
            None => return Err(TransportError::Rejected { status: STALL }),
        };
        report.truncate(len);
        Ok(report)
    }
}
