//! Hotplug monitoring and session dispatch.
//!
//! Two tasks cooperate. The event context owns the `nusb` hotplug stream,
//! waits on it in bounded slices so it can notice shutdown, and pushes typed
//! [`DeviceEvent`]s into a bounded channel. The [`SessionDispatcher`] drains
//! that channel and runs one session at a time. Arrivals seen while a
//! session is running are rejected, since the protocol needs the interface
//! to itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_lite::{Stream, StreamExt, stream};
use nusb::DeviceInfo;
use nusb::hotplug::HotplugEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, SessionConfig};
use crate::error::{MeterError, TransportError};
use crate::export::Exporter;
use crate::registry::{DeviceIdentity, Registry};
use crate::transport::{NusbTransport, Transport};

#[derive(Debug)]
pub enum DeviceEvent<D> {
    Arrived { identity: DeviceIdentity, device: D },
    Left { id: String },
}

/// Counters kept by the dispatcher over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub exported: usize,
    pub failed: usize,
    pub ignored: usize,
}

/// Hand an event to the consumer without ever blocking the event context.
///
/// Returns whether the event was queued.
pub fn forward<D>(events: &mpsc::Sender<DeviceEvent<D>>, busy: &AtomicBool, event: DeviceEvent<D>) -> bool {
    match &event {
        DeviceEvent::Arrived { identity, .. } => {
            info!("Connected: {}", identity);
            if busy.load(Ordering::SeqCst) {
                warn!("Session in progress, rejecting arrival of {}", identity);
                return false;
            }
        }
        DeviceEvent::Left { id } => info!("Disconnected: {}", id),
    }

    match events.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Event queue full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Consumer gone, dropping event");
            false
        }
    }
}

/// Consumes device events and drives one session per matching arrival.
pub struct SessionDispatcher<O, E> {
    registry: Arc<Registry>,
    config: SessionConfig,
    open: O,
    exporter: E,
    busy: Arc<AtomicBool>,
    stats: DispatchStats,
}

impl<O, E> SessionDispatcher<O, E>
where
    E: Exporter,
{
    pub fn new(registry: Arc<Registry>, config: SessionConfig, open: O, exporter: E, busy: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            config,
            open,
            exporter,
            busy,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Drain `events` until every sender is gone.
    pub async fn run<D, T>(mut self, mut events: mpsc::Receiver<DeviceEvent<D>>) -> DispatchStats
    where
        O: FnMut(D, DeviceIdentity) -> Result<T, TransportError>,
        T: Transport,
    {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!(
            exported = self.stats.exported,
            failed = self.stats.failed,
            ignored = self.stats.ignored,
            "Dispatcher stopped"
        );
        self.stats
    }

    pub async fn handle<D, T>(&mut self, event: DeviceEvent<D>)
    where
        O: FnMut(D, DeviceIdentity) -> Result<T, TransportError>,
        T: Transport,
    {
        let (identity, device) = match event {
            DeviceEvent::Arrived { identity, device } => (identity, device),
            DeviceEvent::Left { id } => {
                debug!(device = %id, "Removal needs no action");
                return;
            }
        };

        if self.registry.lookup(identity).is_none() {
            debug!("Ignoring {}, not a supported meter", identity);
            self.stats.ignored += 1;
            return;
        }

        self.busy.store(true, Ordering::SeqCst);
        let outcome = self.read_meter(identity, device).await;
        self.busy.store(false, Ordering::SeqCst);

        match outcome {
            Ok(path) => {
                info!(path = %path.display(), "Meter {} read", identity);
                self.stats.exported += 1;
            }
            Err(e) => {
                error!("Reading meter {} failed: {}", identity, e);
                self.stats.failed += 1;
            }
        }
    }

    async fn read_meter<D, T>(&mut self, identity: DeviceIdentity, device: D) -> Result<PathBuf, MeterError>
    where
        O: FnMut(D, DeviceIdentity) -> Result<T, TransportError>,
        T: Transport,
    {
        let family = self.registry.lookup(identity).ok_or(MeterError::UnsupportedDevice {
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
        })?;
        info!("Reading {} ({})", family, identity);

        let mut transport = (self.open)(device, identity)?;
        let record = family.run_session(&mut transport, &self.config).await?;
        self.exporter.export(&record).await
    }

    pub(crate) fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }
}

fn arrival(device: DeviceInfo) -> DeviceEvent<DeviceInfo> {
    DeviceEvent::Arrived {
        identity: DeviceIdentity::new(device.vendor_id(), device.product_id()),
        device,
    }
}

fn from_hotplug(event: HotplugEvent) -> DeviceEvent<DeviceInfo> {
    match event {
        HotplugEvent::Connected(device) => arrival(device),
        HotplugEvent::Disconnected(id) => DeviceEvent::Left { id: format!("{:?}", id) },
    }
}

/// The background event context: forwards device events until cancelled.
///
/// Each wait on `source` is bounded by `poll_interval`, so a set cancel flag
/// is noticed within one interval even when no device ever shows up.
pub async fn run_event_context<S, D>(
    mut source: S,
    events: mpsc::Sender<DeviceEvent<D>>,
    cancel: watch::Receiver<bool>,
    busy: Arc<AtomicBool>,
    poll_interval: Duration,
) where
    S: Stream<Item = DeviceEvent<D>> + Unpin,
{
    loop {
        if *cancel.borrow() {
            break;
        }
        match tokio::time::timeout(poll_interval, source.next()).await {
            Err(_) => continue,
            Ok(None) => {
                warn!("Device event stream ended");
                break;
            }
            Ok(Some(event)) => {
                forward(&events, &busy, event);
            }
        }
    }
    info!("Event context stopped");
}

/// Watches for meters and reads each one that shows up.
pub struct DeviceMonitor {
    registry: Arc<Registry>,
    session: SessionConfig,
    config: MonitorConfig,
}

impl DeviceMonitor {
    pub fn new(registry: Registry, session: SessionConfig, config: MonitorConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            session,
            config,
        }
    }

    /// Register for hotplug events and start both tasks.
    ///
    /// Meters connected before the call are reported as arrivals.
    pub fn start<E>(self, exporter: E) -> Result<MonitorHandle, MeterError>
    where
        E: Exporter + 'static,
    {
        let hotplug = nusb::watch_devices()?;
        let already_connected: Vec<DeviceInfo> = nusb::list_devices()?.collect();
        info!(
            devices = already_connected.len(),
            "Hotplug callback registered, watching for {}",
            self.registry
                .identities()
                .map(|identity| identity.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let source = stream::iter(already_connected.into_iter().map(arrival)).chain(hotplug.map(from_hotplug));
        let open = |device: DeviceInfo, identity: DeviceIdentity| NusbTransport::open(&device, identity);
        let dispatcher = SessionDispatcher::new(
            self.registry,
            self.session,
            open,
            exporter,
            Arc::new(AtomicBool::new(false)),
        );

        Ok(MonitorHandle::spawn(source, dispatcher, &self.config))
    }
}

pub struct MonitorHandle {
    cancel: watch::Sender<bool>,
    event_context: JoinHandle<()>,
    consumer: JoinHandle<DispatchStats>,
}

impl MonitorHandle {
    /// Run the event context over `source` and `dispatcher` as its consumer.
    pub fn spawn<S, D, O, T, E>(source: S, dispatcher: SessionDispatcher<O, E>, config: &MonitorConfig) -> Self
    where
        S: Stream<Item = DeviceEvent<D>> + Unpin + Send + 'static,
        D: Send + 'static,
        O: FnMut(D, DeviceIdentity) -> Result<T, TransportError> + Send + 'static,
        T: Transport + 'static,
        E: Exporter + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let event_context = tokio::spawn(run_event_context(
            source,
            events_tx,
            cancel_rx,
            dispatcher.busy_flag(),
            config.poll_interval,
        ));
        let consumer = tokio::spawn(dispatcher.run(events_rx));

        Self {
            cancel: cancel_tx,
            event_context,
            consumer,
        }
    }

    /// Stop watching, let the consumer finish what is queued, and join both tasks.
    pub async fn shutdown(self) -> DispatchStats {
        info!("Stopping device monitor...");
        let _ = self.cancel.send(true);
        if let Err(e) = self.event_context.await {
            error!("Event context failed: {}", e);
        }
        match self.consumer.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Dispatcher failed: {}", e);
                DispatchStats::default()
            }
        }
    }
}
