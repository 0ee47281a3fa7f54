#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the device table, fan-out, reads and control path.
//!
//! Every device is backed by a `SimulatedTransport`, so no hardware is needed.

use std::sync::Arc;
use std::time::Duration;

use hidmux_core::Config;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use hidmux_daemon::{
    BusType, ControlRequest, ControlResponse, DeviceDescriptor, DeviceHandle, Multiplexer,
    MuxError, ReadMode, Readiness, ReportKind, SessionSignal, SimulatedTransport, TransportError,
};

const WAIT: Duration = Duration::from_secs(2);

fn config(ring_capacity: usize) -> Config {
    let mut config = Config::default();
    config.multiplexer.max_devices = 4;
    config.multiplexer.ring_capacity = ring_capacity;
    config
}

fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor::new(BusType::Usb, 0x2833, 0x0021)
        .with_name("Tracker DK2")
        .with_phys("usb-0000:00:14.0-2/input0")
        .with_report_descriptor(vec![0x06, 0x00, 0xFF, 0x09, 0x01, 0xA1, 0x01, 0xC0])
        .with_serial("WMHD3000000000")
}

/// Multiplexer with one attached simulated device.
fn setup(config: &Config) -> (Multiplexer, DeviceHandle, Arc<SimulatedTransport>) {
    let mux = Multiplexer::new(config, Handle::current()).unwrap();
    let sim = Arc::new(SimulatedTransport::new());
    let handle = mux.attach(descriptor(), sim.clone()).unwrap();
    (mux, handle, sim)
}

// =========================================================================
// Ring and fan-out
// =========================================================================

#[tokio::test]
async fn overflow_drops_newest_and_keeps_order() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    for event in [b"A", b"B", b"C", b"D", b"E"] {
        handle.deliver(event);
    }

    for expected in [b"A", b"B", b"C", b"D"] {
        let got = session.read(64, ReadMode::NonBlocking).await.unwrap();
        assert_eq!(got, expected.to_vec());
    }
    assert_eq!(session.poll_ready(), Readiness::NotReady);
    assert!(matches!(
        session.read(64, ReadMode::NonBlocking).await,
        Err(MuxError::WouldBlock)
    ));
    assert_eq!(session.dropped_events(), 1);
}

#[tokio::test]
async fn every_session_gets_its_own_copy() {
    let (mux, handle, _) = setup(&config(4));
    let a = mux.open(handle.slot()).unwrap();
    let b = mux.open(handle.slot()).unwrap();

    let report = handle.deliver(b"X");
    assert_eq!(report.queued, 2);

    assert_eq!(a.read(64, ReadMode::NonBlocking).await.unwrap(), b"X".to_vec());
    assert_eq!(b.poll_ready(), Readiness::Readable);
    assert_eq!(b.read(64, ReadMode::NonBlocking).await.unwrap(), b"X".to_vec());
}

#[tokio::test]
async fn full_session_does_not_starve_others() {
    let (mux, handle, _) = setup(&config(2));
    let lagging = mux.open(handle.slot()).unwrap();
    let active = mux.open(handle.slot()).unwrap();

    for i in 0..6u8 {
        handle.deliver(&[i]);
        assert_eq!(active.read(8, ReadMode::NonBlocking).await.unwrap(), vec![i]);
    }

    assert_eq!(lagging.queued(), 2);
    assert_eq!(lagging.dropped_events(), 4);
    assert_eq!(active.dropped_events(), 0);
    assert_eq!(mux.stats().events_dropped, 4);
}

#[tokio::test]
async fn read_truncates_to_caller_buffer() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();
    handle.deliver(&[1, 2, 3, 4, 5]);
    assert_eq!(
        session.read(3, ReadMode::NonBlocking).await.unwrap(),
        vec![1, 2, 3]
    );
    assert_eq!(session.queued(), 0);
}

// =========================================================================
// Blocking, cancellation, wakeups
// =========================================================================

#[tokio::test]
async fn blocking_read_wakes_on_delivery() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    let reader = tokio::spawn(async move { session.read(64, ReadMode::Blocking).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    handle.deliver(b"wake");
    let got = tokio::time::timeout(WAIT, reader)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(got, b"wake".to_vec());
}

#[tokio::test]
async fn cancelled_read_is_interrupted_and_releases_lock() {
    let (mux, handle, _) = setup(&config(4));
    let session = Arc::new(mux.open(handle.slot()).unwrap());
    let cancel = CancellationToken::new();

    let reader = {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        tokio::spawn(async move { session.read_cancellable(64, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap();
    assert!(matches!(result, Err(MuxError::Interrupted)));

    handle.deliver(b"after");
    assert_eq!(
        session.read(64, ReadMode::NonBlocking).await.unwrap(),
        b"after".to_vec()
    );
}

#[tokio::test]
async fn abandoned_read_loses_nothing() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        session.read(64, ReadMode::Blocking),
    )
    .await;
    assert!(timed_out.is_err());

    handle.deliver(b"kept");
    assert_eq!(
        session.read(64, ReadMode::Blocking).await.unwrap(),
        b"kept".to_vec()
    );
}

#[tokio::test]
async fn detach_wakes_blocked_reader_with_gone() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    let reader = tokio::spawn(async move {
        let result = session.read(64, ReadMode::Blocking).await;
        (result, session)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    mux.detach(handle.slot()).unwrap();

    let (result, session) = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap();
    assert!(matches!(result, Err(MuxError::Gone { .. })));
    assert!(!handle.is_released());

    session.close();
    assert!(handle.is_released());
}

// =========================================================================
// Device lifetime
// =========================================================================

#[tokio::test]
async fn open_count_follows_open_and_close() {
    let (mux, handle, _) = setup(&config(4));
    let mut sessions = Vec::new();
    for n in 1..=5 {
        sessions.push(mux.open(handle.slot()).unwrap());
        assert_eq!(handle.open_count(), n);
    }
    while let Some(session) = sessions.pop() {
        session.close();
        assert_eq!(handle.open_count(), sessions.len());
    }
    assert!(!handle.is_released());
}

#[tokio::test]
async fn detach_defers_release_until_last_close() {
    let (mux, handle, _) = setup(&config(4));
    let a = mux.open(handle.slot()).unwrap();
    let b = mux.open(handle.slot()).unwrap();
    handle.deliver(b"last");

    mux.detach(handle.slot()).unwrap();
    assert!(!handle.exists());
    assert!(!handle.is_released());
    assert!(mux.lookup(handle.slot()).is_some());

    // Queued data is still readable after the hang-up.
    assert_eq!(a.poll_ready(), Readiness::Readable);
    assert_eq!(a.read(64, ReadMode::NonBlocking).await.unwrap(), b"last".to_vec());
    assert_eq!(a.poll_ready(), Readiness::HangUp);
    assert!(matches!(
        a.read(64, ReadMode::NonBlocking).await,
        Err(MuxError::Gone { .. })
    ));

    // Late deliveries are discarded.
    assert_eq!(handle.deliver(b"late").queued, 0);

    a.close();
    assert!(!handle.is_released());
    b.close();
    assert!(handle.is_released());
    assert!(mux.lookup(handle.slot()).is_none());
    assert_eq!(mux.stats().devices_released, 1);
}

#[tokio::test]
async fn table_full_refuses_attach() {
    let mut config = config(4);
    config.multiplexer.max_devices = 1;
    let (mux, handle, _) = setup(&config);

    let err = mux
        .attach(descriptor(), Arc::new(SimulatedTransport::new()))
        .unwrap_err();
    assert!(matches!(err, MuxError::NoFreeSlot { max: 1 }));

    mux.detach(handle.slot()).unwrap();
    let again = mux
        .attach(descriptor(), Arc::new(SimulatedTransport::new()))
        .unwrap();
    assert_eq!(again.slot(), handle.slot());
}

// =========================================================================
// Control channel
// =========================================================================

#[tokio::test]
async fn control_after_detach_performs_no_transaction() {
    let (mux, handle, sim) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();
    mux.detach(handle.slot()).unwrap();

    let err = session
        .send_request(ControlRequest::get_feature(0x31, 24))
        .await
        .unwrap_err();
    assert!(matches!(err, MuxError::NoDevice { .. }));
    assert!(session.write(&[0x02, 0xAA]).await.is_err());
    assert_eq!(sim.transactions(), 0);
}

#[tokio::test]
async fn control_length_is_validated_before_transport() {
    let (mux, handle, sim) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    assert!(matches!(
        session.write(&[0x02]).await,
        Err(MuxError::InvalidLength { len: 1, .. })
    ));
    assert!(matches!(
        session
            .send_request(ControlRequest::get_feature(0x31, 4097))
            .await,
        Err(MuxError::InvalidLength { len: 4097, .. })
    ));
    assert_eq!(sim.transactions(), 0);
}

#[tokio::test]
async fn feature_and_output_reports_reach_device() {
    let (mux, handle, sim) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    assert_eq!(session.write(&[0x02, 0xAA, 0xBB]).await.unwrap(), 3);
    let sent = session
        .send_request(ControlRequest::send_feature(0x08, &[0x10, 0x20]))
        .await
        .unwrap();
    assert_eq!(sent, ControlResponse::Sent(3));

    let got = session
        .send_request(ControlRequest::get_feature(0x08, 16))
        .await
        .unwrap();
    assert_eq!(got, ControlResponse::Received(vec![0x08, 0x10, 0x20]));

    let reports = sim.sent_reports();
    assert_eq!(reports[0], (ReportKind::Output, vec![0x02, 0xAA, 0xBB]));
    assert_eq!(reports[1], (ReportKind::Feature, vec![0x08, 0x10, 0x20]));
}

#[tokio::test]
async fn transport_errors_pass_through() {
    let (mux, handle, sim) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    sim.fail_next(TransportError::Timeout);
    let err = session.write(&[0x02, 0x01]).await.unwrap_err();
    assert!(matches!(err, MuxError::Transport(TransportError::Timeout)));

    let err = session
        .send_request(ControlRequest::get_feature(0x44, 8))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MuxError::Transport(TransportError::Rejected { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn control_transactions_are_serialized_per_device() {
    let mux = Multiplexer::new(&config(4), Handle::current()).unwrap();
    let sim = Arc::new(SimulatedTransport::with_latency(Duration::from_millis(10)));
    let handle = mux.attach(descriptor(), sim.clone()).unwrap();

    let mut tasks = Vec::new();
    for n in 0..4u8 {
        let session = mux.open(handle.slot()).unwrap();
        tasks.push(tokio::spawn(async move {
            session.write(&[0x02, n]).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 2);
    }

    assert_eq!(sim.transactions(), 4);
    assert_eq!(sim.max_in_flight(), 1);
}

// =========================================================================
// Identification and notifications
// =========================================================================

#[tokio::test]
async fn identification_queries() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();

    let info = session.device_info().unwrap();
    assert_eq!(info.bus, BusType::Usb);
    assert_eq!((info.vendor, info.product), (0x2833, 0x0021));

    assert_eq!(session.report_descriptor_size().unwrap(), 8);
    assert_eq!(
        session.report_descriptor(3).unwrap(),
        vec![0x06, 0x00, 0xFF]
    );
    assert_eq!(session.report_descriptor(4095).unwrap().len(), 8);
    assert!(matches!(
        session.report_descriptor(4096),
        Err(MuxError::InvalidLength { len: 4096, .. })
    ));

    assert_eq!(session.raw_name(7).unwrap(), b"Tracker".to_vec());
    assert_eq!(
        session.raw_phys(256).unwrap(),
        b"usb-0000:00:14.0-2/input0".to_vec()
    );
    assert_eq!(
        session.serial_number().unwrap().as_deref(),
        Some("WMHD3000000000")
    );

    mux.detach(handle.slot()).unwrap();
    assert!(matches!(
        session.device_info(),
        Err(MuxError::NoDevice { .. })
    ));
    assert!(session.serial_number().is_err());
    assert!(session.raw_name(16).is_err());
}

#[tokio::test]
async fn long_serial_is_truncated_at_attach() {
    let mux = Multiplexer::new(&config(4), Handle::current()).unwrap();
    let handle = mux
        .attach(
            descriptor().with_serial("S".repeat(400)),
            Arc::new(SimulatedTransport::new()),
        )
        .unwrap();
    let session = mux.open(handle.slot()).unwrap();
    assert_eq!(session.serial_number().unwrap().unwrap().len(), 255);
}

#[tokio::test]
async fn notifications_signal_data_and_hangup() {
    let (mux, handle, _) = setup(&config(4));
    let session = mux.open(handle.slot()).unwrap();
    let mut signals = session.enable_notifications(8);

    handle.deliver(b"x");
    assert_eq!(signals.recv().await, Some(SessionSignal::Readable));

    mux.detach(handle.slot()).unwrap();
    assert_eq!(signals.recv().await, Some(SessionSignal::HangUp));

    assert!(session.disable_notifications());
    assert_eq!(signals.recv().await, None);
}

// =========================================================================
// Monitor
// =========================================================================

fn monitor_config() -> Config {
    let mut config = config(4);
    config.monitor.interval_ms = 10;
    config
}

#[tokio::test]
async fn monitor_runs_only_while_primary_is_open() {
    let (mux, handle, sim) = setup(&monitor_config());
    assert!(!mux.stats().monitor_armed);

    let session = mux.open_with_owner(handle.slot(), "tracker").unwrap();
    assert!(mux.stats().monitor_armed);
    handle.deliver(b"a");
    session.read(64, ReadMode::NonBlocking).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(sim.transactions() >= 1, "monitor should poll diagnostics");

    session.close();
    assert!(!mux.stats().monitor_armed);
    let polled = sim.transactions();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(sim.transactions(), polled);
}

#[tokio::test]
async fn monitor_follows_the_latest_device() {
    let mux = Multiplexer::new(&monitor_config(), Handle::current()).unwrap();
    let first_sim = Arc::new(SimulatedTransport::new());
    let first = mux.attach(descriptor(), first_sim.clone()).unwrap();
    let _on_first = mux.open(first.slot()).unwrap();
    assert!(mux.stats().monitor_armed);
    assert_eq!(mux.monitor_entries().len(), 1);

    let second_sim = Arc::new(SimulatedTransport::new());
    let second = mux.attach(descriptor(), second_sim.clone()).unwrap();
    assert_eq!(mux.primary(), Some(second.slot()));
    assert!(!mux.stats().monitor_armed);
    assert!(mux.monitor_entries().is_empty());

    let before = first_sim.transactions();
    let _on_second = mux.open(second.slot()).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(second_sim.transactions() >= 1);
    assert_eq!(first_sim.transactions(), before);

    mux.detach(second.slot()).unwrap();
    assert_eq!(mux.primary(), None);
    assert!(!mux.stats().monitor_armed);
}

#[tokio::test]
async fn disabled_monitor_never_arms() {
    let mut config = monitor_config();
    config.monitor.enabled = false;
    let (mux, handle, sim) = setup(&config);
    let _session = mux.open(handle.slot()).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!mux.stats().monitor_armed);
    assert_eq!(sim.transactions(), 0);
}

#[tokio::test(start_paused = true)]
async fn monitor_waits_full_interval_after_each_tick() {
    let mux = Multiplexer::new(&monitor_config(), Handle::current()).unwrap();
    let sim = Arc::new(SimulatedTransport::with_latency(Duration::from_millis(50)));
    let handle = mux.attach(descriptor(), sim.clone()).unwrap();
    let session = mux.open(handle.slot()).unwrap();

    // Ticks start at 10ms, then every 50ms transaction plus 10ms delay.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let polled = sim.transactions();
    assert!((16..=17).contains(&polled), "{polled} diagnostic transactions");

    // The last close abandons the tick in flight and frees the control lock.
    session.close();
    assert!(!mux.stats().monitor_armed);
    let writer = mux.open(handle.slot()).unwrap();
    let written = tokio::time::timeout(Duration::from_millis(55), writer.write(&[0x02, 0x01]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(sim.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn reads_update_primary_monitor_entry() {
    let (mux, handle, _) = setup(&monitor_config());
    let session = mux.open_with_owner(handle.slot(), "tracker").unwrap();
    handle.deliver(b"a");
    handle.deliver(b"b");

    session.read(64, ReadMode::NonBlocking).await.unwrap();
    let entries = mux.monitor_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].session, session.id());
    assert_eq!(entries[0].owner, "tracker");
    assert_eq!(entries[0].delivered, 1);
    let first_active = entries[0].last_active;

    tokio::time::sleep(Duration::from_millis(4)).await;
    session.read(64, ReadMode::NonBlocking).await.unwrap();
    let entries = mux.monitor_entries();
    assert_eq!(entries[0].delivered, 2);
    assert!(entries[0].last_active >= first_active);

    // The first tick at 10ms logs and resets the count.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mux.monitor_entries()[0].delivered, 0);

    // Once another device is primary, reads here are no longer tracked.
    let _second = mux
        .attach(descriptor(), Arc::new(SimulatedTransport::new()))
        .unwrap();
    let untracked = mux.open(handle.slot()).unwrap();
    handle.deliver(b"c");
    untracked.read(64, ReadMode::NonBlocking).await.unwrap();
    session.read(64, ReadMode::NonBlocking).await.unwrap();
    assert!(mux.monitor_entries().is_empty());
}

// =========================================================================
// Configuration
// =========================================================================

#[tokio::test]
async fn multiplexer_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"multiplexer": {"ring_capacity": 2}}"#).unwrap();

    // Only the file itself; the host's global settings and env stay out of it.
    let config = hidmux_core::config::load_config_file(&path).unwrap();
    config.validate().unwrap();
    let (mux, handle, _) = setup(&config);
    let session = mux.open(handle.slot()).unwrap();
    for event in [b"1", b"2", b"3"] {
        handle.deliver(event);
    }
    assert_eq!(session.queued(), 2);
    assert_eq!(session.dropped_events(), 1);
}
