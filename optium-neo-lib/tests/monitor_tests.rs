//! Event forwarding and session dispatch without real hardware

mod common;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::*;
use futures_lite::{StreamExt, stream};
use optium_neo_lib::monitor::{forward, run_event_context};
use optium_neo_lib::{
    DeviceEvent, DeviceIdentity, DispatchStats, MonitorConfig, MonitorHandle, Registry, SessionDispatcher,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

const NEO: DeviceIdentity = DeviceIdentity::new(0x1a61, 0x3850);
const KEYBOARD: DeviceIdentity = DeviceIdentity::new(0x046d, 0xc31c);

fn dispatcher(
    exporter: MemoryExporter,
    busy: Arc<AtomicBool>,
) -> SessionDispatcher<impl FnMut((), DeviceIdentity) -> Result<ScriptedTransport, TransportError>, MemoryExporter> {
    SessionDispatcher::new(
        Arc::new(Registry::default()),
        instant_config(),
        |_device: (), _identity: DeviceIdentity| -> Result<ScriptedTransport, TransportError> {
            Ok(ScriptedTransport::neo())
        },
        exporter,
        busy,
    )
}

#[tokio::test]
async fn test_only_matching_arrivals_start_sessions() {
    let exporter = MemoryExporter::default();
    let (tx, rx) = mpsc::channel(8);

    tx.send(DeviceEvent::Arrived {
        identity: KEYBOARD,
        device: (),
    })
    .await
    .unwrap();
    tx.send(DeviceEvent::Arrived { identity: NEO, device: () }).await.unwrap();
    tx.send(DeviceEvent::Left {
        id: "DeviceId(1)".to_string(),
    })
    .await
    .unwrap();
    drop(tx);

    let stats = dispatcher(exporter.clone(), Arc::new(AtomicBool::new(false)))
        .run(rx)
        .await;

    assert_eq!(
        stats,
        DispatchStats {
            exported: 1,
            failed: 0,
            ignored: 1
        }
    );
    let records = exporter.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].serial_number, SERIAL);
}

#[tokio::test]
async fn test_each_arrival_gets_a_fresh_session() {
    let exporter = MemoryExporter::default();
    let mut dispatcher = dispatcher(exporter.clone(), Arc::new(AtomicBool::new(false)));

    dispatcher.handle(DeviceEvent::Arrived { identity: NEO, device: () }).await;
    dispatcher.handle(DeviceEvent::Arrived { identity: NEO, device: () }).await;

    assert_eq!(dispatcher.stats().exported, 2);
    let records = exporter.records.lock().unwrap();
    assert_eq!(records[0], records[1]);
}

#[tokio::test]
async fn test_open_failure_is_counted_and_clears_busy() {
    let exporter = MemoryExporter::default();
    let busy = Arc::new(AtomicBool::new(false));
    let mut dispatcher = SessionDispatcher::new(
        Arc::new(Registry::default()),
        instant_config(),
        |_device: (), _identity: DeviceIdentity| -> Result<ScriptedTransport, TransportError> {
            Err(TransportError::Open(io::ErrorKind::PermissionDenied.into()))
        },
        exporter.clone(),
        busy.clone(),
    );

    dispatcher.handle(DeviceEvent::Arrived { identity: NEO, device: () }).await;

    assert_eq!(dispatcher.stats().failed, 1);
    assert!(!busy.load(Ordering::SeqCst));
    assert!(exporter.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_arrival_rejected_while_session_running() {
    let (tx, mut rx) = mpsc::channel::<DeviceEvent<()>>(4);
    let busy = AtomicBool::new(true);

    assert!(!forward(&tx, &busy, DeviceEvent::Arrived { identity: NEO, device: () }));
    // removals are still passed on
    assert!(forward(&tx, &busy, DeviceEvent::Left { id: "x".to_string() }));

    drop(tx);
    assert!(matches!(rx.recv().await, Some(DeviceEvent::Left { .. })));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_forward_never_blocks_on_full_queue() {
    let (tx, _rx) = mpsc::channel::<DeviceEvent<()>>(1);
    let busy = AtomicBool::new(false);

    assert!(forward(&tx, &busy, DeviceEvent::Arrived { identity: NEO, device: () }));
    assert!(!forward(&tx, &busy, DeviceEvent::Arrived { identity: NEO, device: () }));
}

#[tokio::test]
async fn test_event_context_stops_within_one_poll_interval() {
    let poll_interval = Duration::from_millis(20);
    let (tx, mut rx) = mpsc::channel::<DeviceEvent<()>>(4);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let source = stream::once(DeviceEvent::Arrived { identity: NEO, device: () }).chain(stream::pending());

    let context = tokio::spawn(run_event_context(
        source,
        tx,
        cancel_rx,
        Arc::new(AtomicBool::new(false)),
        poll_interval,
    ));

    assert!(matches!(rx.recv().await, Some(DeviceEvent::Arrived { .. })));
    cancel_tx.send(true).unwrap();

    timeout(poll_interval * 3, context)
        .await
        .expect("event context ignored cancellation")
        .unwrap();
    // the sender went away with the context
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_joins_both_tasks_after_draining() {
    let exporter = MemoryExporter::default();
    let config = MonitorConfig {
        poll_interval: Duration::from_millis(20),
        ..MonitorConfig::default()
    };
    let source = stream::once(DeviceEvent::Arrived { identity: NEO, device: () }).chain(stream::pending());

    let handle = MonitorHandle::spawn(
        source,
        dispatcher(exporter.clone(), Arc::new(AtomicBool::new(false))),
        &config,
    );
    sleep(config.poll_interval).await;

    let stats = timeout(config.poll_interval * 10, handle.shutdown())
        .await
        .expect("monitor did not shut down");

    assert_eq!(stats.exported, 1);
    assert_eq!(exporter.records.lock().unwrap()[0].serial_number, SERIAL);
}
