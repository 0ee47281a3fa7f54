//! hidmux Daemon
//!
//! Runs the multiplexer against simulated tracker devices: a paced producer
//! feeds every device, reader tasks consume each session, and the monitor
//! logs diagnostics for the primary device.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hidmux_core::config::load_config;
use hidmux_core::tracing_init::init_from_config;
use hidmux_daemon::{
    BusType, DeviceDescriptor, DeviceHandle, Multiplexer, ReadMode, Session,
    SimulatedTransport,
};

const SIM_VENDOR: u16 = 0x2833;
const SIM_PRODUCT: u16 = 0x0021;
const SAMPLE_REPORT_ID: u8 = 0x0B;

/// Vendor-defined collection with one 62-byte input report.
const SIM_REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0x00, 0xFF, 0x09, 0x01, 0xA1, 0x01, 0x85, SAMPLE_REPORT_ID, 0x15, 0x00, 0x26, 0xFF,
    0x00, 0x75, 0x08, 0x95, 0x3E, 0x09, 0x01, 0x81, 0x02, 0xC0,
];

#[derive(Parser, Debug)]
#[command(name = "hidmux-daemon")]
#[command(version, about = "hidmux daemon - HID event stream multiplexer")]
struct Args {
    /// Settings file, applied over the global one
    #[arg(long, env = "HIDMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Number of simulated devices to attach
    #[arg(long, default_value_t = 1, env = "HIDMUX_SIM_DEVICES")]
    devices: usize,

    /// Reader sessions opened on each device
    #[arg(long, default_value_t = 2, env = "HIDMUX_SIM_SESSIONS")]
    sessions: usize,

    /// Sample reports generated per second and device
    #[arg(long, default_value_t = 500, env = "HIDMUX_SIM_RATE_HZ")]
    rate_hz: u32,

    /// Bytes per sample report, report number included
    #[arg(long, default_value_t = 62, env = "HIDMUX_SIM_REPORT_LEN")]
    report_len: usize,

    /// Stop after this many seconds (runs until Ctrl+C if unset)
    #[arg(long, env = "HIDMUX_SIM_DURATION_SECS")]
    duration_secs: Option<u64>,

    /// Log level filter, overrides the settings file (e.g. "info", "debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "HIDMUX_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log.level.clone_from(level);
    }
    config.log.json |= args.log_json;
    init_from_config(&config.log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        devices = args.devices,
        sessions = args.sessions,
        rate_hz = args.rate_hz,
        ring_capacity = config.multiplexer.ring_capacity,
        "Starting hidmux-daemon"
    );

    let mux = Multiplexer::new(&config, Handle::current())?;

    let mut devices = Vec::with_capacity(args.devices);
    let mut readers = Vec::new();
    for index in 0..args.devices {
        let transport = Arc::new(SimulatedTransport::new());
        let handle = mux.attach(sim_descriptor(index), transport.clone())?;

        for n in 0..args.sessions {
            let session = mux.open_with_owner(handle.slot(), &format!("reader-{index}.{n}"))?;
            if n == 0 {
                describe(&session);
            }
            readers.push(tokio::spawn(run_reader(session, args.report_len)));
        }
        devices.push((handle, transport));
    }

    let shutdown = CancellationToken::new();
    let producer = tokio::spawn(run_producer(
        devices.clone(),
        args.rate_hz,
        args.report_len,
        shutdown.clone(),
    ));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let run_for = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = run_for => {
            info!("Run duration elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    shutdown.cancel();
    if let Err(e) = producer.await {
        warn!(error = %e, "Producer task failed");
    }

    // Readers see the hang-up, drain what is left, and close their sessions.
    for (handle, _) in &devices {
        if let Err(e) = mux.detach(handle.slot()) {
            warn!(slot = %handle.slot(), error = %e, "Detach failed");
        }
    }
    let mut total = 0u64;
    for reader in readers {
        total += reader.await.unwrap_or(0);
    }

    let stats = mux.stats();
    info!(
        events_read = total,
        devices_released = stats.devices_released,
        open_sessions = stats.open_sessions,
        "Daemon stopped"
    );
    Ok(())
}

fn sim_descriptor(index: usize) -> DeviceDescriptor {
    DeviceDescriptor::new(BusType::Virtual, SIM_VENDOR, SIM_PRODUCT)
        .with_name(format!("hidmux simulated tracker {index}"))
        .with_phys(format!("sim/input{index}"))
        .with_report_descriptor(SIM_REPORT_DESCRIPTOR.to_vec())
        .with_serial(format!("SIM{index:08}"))
}

fn describe(session: &Session) {
    match (session.device_info(), session.serial_number()) {
        (Ok(info), Ok(serial)) => info!(
            slot = %session.slot(),
            bus = ?info.bus,
            vendor = format!("{:04x}", info.vendor),
            product = format!("{:04x}", info.product),
            serial = serial.as_deref().unwrap_or("-"),
            rdesc_len = session.report_descriptor_size().unwrap_or(0),
            "Device ready"
        ),
        (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Device query failed"),
    }
}

/// Consume one session until its device goes away. Returns events read.
async fn run_reader(session: Session, max_len: usize) -> u64 {
    let mut events = 0u64;
    loop {
        match session.read(max_len, ReadMode::Blocking).await {
            Ok(_) => events += 1,
            Err(e) if e.is_device_missing() => break,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Read failed");
                break;
            }
        }
    }
    info!(
        session_id = %session.id(),
        events,
        dropped = session.dropped_events(),
        "Reader finished"
    );
    events
}

/// Deliver one sample report per tick to every device.
async fn run_producer(
    devices: Vec<(DeviceHandle, Arc<SimulatedTransport>)>,
    rate_hz: u32,
    report_len: usize,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(1) / rate_hz.max(1);
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut seq = 0u32;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let report = sample_report(seq, report_len);
                for (handle, transport) in &devices {
                    transport.record_sample();
                    handle.deliver(&report);
                }
                seq = seq.wrapping_add(1);
            }
            () = shutdown.cancelled() => {
                return;
            }
        }
    }
}

fn sample_report(seq: u32, len: usize) -> Vec<u8> {
    let mut report = vec![0u8; len.max(5)];
    report[0] = SAMPLE_REPORT_ID;
    report[1..5].copy_from_slice(&seq.to_le_bytes());
    report
}
