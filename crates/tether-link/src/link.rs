//! The connection supervisor
//!
//! [`Connector`] owns the connection to one device. Callers discover the
//! device and exchange commands with it; in the background a liveness
//! monitor watches the link and, when it breaks, a reconnection task looks
//! for the device again.
//!
//! All state transitions happen under one async mutex. A lost connection is
//! always handled by [`Shared::lose_connection`], which takes the link out
//! of the state so only the first detector of a failure reports it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tether_detect::{
    close_link, discover, read_response, write_all_within, DiscoverOptions, Discovered,
    SerialLink, Transport,
};
use tether_protocol::HostMessage;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{Callbacks, EventBus, LinkEvent};
use crate::history::ResponseHistory;
use crate::monitor::{self, Probe};
use crate::reconnect::Reconnector;
use crate::state::ConnectionState;

/// State shared between the connector and its background tasks
pub(crate) struct Shared<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: LinkConfig,
    pub(crate) state: Mutex<ConnectionState<T::Link>>,
    pub(crate) history: SyncMutex<ResponseHistory>,
    pub(crate) callbacks: Callbacks,
    pub(crate) events: EventBus,
    pub(crate) reconnector: Reconnector,
    pub(crate) cancel: CancellationToken,
    auto_reconnect: AtomicBool,
    /// Set after a lost connection has been reported, cleared on connect
    recovery_pending: AtomicBool,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn new(transport: T, config: LinkConfig) -> Self {
        let auto_reconnect = AtomicBool::new(config.auto_reconnect);
        Self {
            transport,
            config,
            state: Mutex::new(ConnectionState::default()),
            history: SyncMutex::new(ResponseHistory::new()),
            callbacks: Callbacks::default(),
            events: EventBus::default(),
            reconnector: Reconnector::default(),
            cancel: CancellationToken::new(),
            auto_reconnect,
            recovery_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn recovery_pending(&self) -> bool {
        self.recovery_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Install a freshly authenticated link
    ///
    /// Returns the port, or `None` if a device is already connected or
    /// shutdown has begun, in which case the new link is closed. The
    /// connection is announced before the state lock is released, as a
    /// reconnection when `recovered` is set.
    pub(crate) async fn establish(
        &self,
        found: Discovered<T::Link>,
        recovered: bool,
    ) -> Option<String> {
        let mut state = self.state.lock().await;
        if self.cancel.is_cancelled() || state.is_connected() {
            drop(state);
            close_link(found.link).await;
            return None;
        }

        let port = found.port;
        state.install(port.clone(), found.link);
        self.recovery_pending.store(false, Ordering::SeqCst);

        if recovered {
            info!("Successfully reconnected to device on {}", port);
            self.callbacks.fire_reconnect(&port);
            self.events.emit(LinkEvent::Reconnected { port: port.clone() });
        } else {
            info!("Connected to device on {}", port);
            self.events.emit(LinkEvent::Connected { port: port.clone() });
        }
        Some(port)
    }

    /// Handle a detected failure of the current connection
    ///
    /// Consumes the state guard and holds it until the loss has been
    /// reported, so no connection can be established in between. Does
    /// nothing if the state is already disconnected, so concurrent detectors
    /// report a loss exactly once.
    pub(crate) async fn lose_connection(
        &self,
        mut state: MutexGuard<'_, ConnectionState<T::Link>>,
        reason: LinkError,
    ) {
        let Some((port, link)) = state.take() else {
            return;
        };

        close_link(link).await;
        let reason = reason.to_string();
        warn!("Device disconnected from {}: {}", port, reason);
        self.callbacks.fire_disconnect(&port);
        self.events.emit(LinkEvent::Disconnected { port, reason });

        // Raised only after dispatch so recovery cannot overtake the report
        if !self.cancel.is_cancelled() {
            self.recovery_pending.store(true, Ordering::SeqCst);
        }
        drop(state);
    }
}

/// Supervisor for the connection to one device
///
/// Must be created inside a Tokio runtime; the liveness monitor is spawned
/// immediately. Dropping the connector stops its background tasks; call
/// [`Connector::shutdown`] to also wait for them and close the link.
pub struct Connector<T: Transport> {
    shared: Arc<Shared<T>>,
    monitor: SyncMutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Connector<T> {
    /// Create a connector and start its liveness monitor
    pub fn new(transport: T, config: LinkConfig) -> Self {
        let shared = Arc::new(Shared::new(transport, config));
        let monitor = tokio::spawn(monitor::run_monitor(Arc::clone(&shared)));
        Self {
            shared,
            monitor: SyncMutex::new(Some(monitor)),
        }
    }

    /// Find the device with default options, returning its port
    pub async fn discover(&self) -> Option<String> {
        self.discover_with(DiscoverOptions::default()).await
    }

    /// Find the device, returning its port
    ///
    /// Returns the current port without probing if a device is already
    /// connected.
    pub async fn discover_with(&self, options: DiscoverOptions) -> Option<String> {
        if let Some(port) = self.current_port().await {
            debug!("Already connected to {}", port);
            return Some(port);
        }

        let shared = &self.shared;
        let found = discover(
            &shared.transport,
            &shared.config.discovery,
            options,
            &shared.cancel,
        )
        .await?;

        if let Some(port) = shared.establish(found, false).await {
            return Some(port);
        }
        // Lost a race with background recovery
        self.current_port().await
    }

    /// Send a command and wait for its response
    ///
    /// Returns `None` when not connected, when the device stays silent and
    /// when the link fails; a failed link is handled as a disconnection.
    pub async fn send(&self, command: &str) -> Option<String> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        let Some(link) = state.link_mut() else {
            if !shared.reconnector.in_flight() && !shared.cancel.is_cancelled() {
                warn!("Not connected to any device. Waiting for auto-reconnect...");
            }
            return None;
        };

        match exchange(link, command, &shared.config).await {
            Ok(Some(response)) => {
                shared.history.lock().push(response.clone());
                Some(response)
            }
            Ok(None) => {
                debug!("No response to {:?}", command);
                None
            }
            Err(e) => {
                shared.lose_connection(state, e).await;
                None
            }
        }
    }

    /// The `count` most recent responses, newest last
    pub fn latest(&self, count: usize) -> Vec<String> {
        self.shared.history.lock().latest(count)
    }

    /// Number of responses currently kept
    pub fn history_len(&self) -> usize {
        self.shared.history.lock().len()
    }

    /// Probe the connection now instead of waiting for the monitor
    ///
    /// Returns true if a device is connected and still reachable.
    pub async fn check_connection(&self) -> bool {
        matches!(
            monitor::check_connection(&self.shared).await,
            Probe::Healthy | Probe::Inconclusive
        )
    }

    /// Call `callback` with the former port whenever the device is lost
    ///
    /// Callbacks run while the connection state is locked and must not
    /// block waiting on this connector.
    pub fn set_disconnect_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_disconnect(Arc::new(callback));
    }

    /// Call `callback` with the new port whenever recovery succeeds
    pub fn set_reconnect_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_reconnect(Arc::new(callback));
    }

    pub fn enable_auto_reconnect(&self, enabled: bool) {
        self.shared.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Receive every lifecycle event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.state.lock().await.is_connected()
    }

    pub async fn current_port(&self) -> Option<String> {
        self.shared.state.lock().await.port().map(str::to_owned)
    }

    /// True while a background reconnection attempt is running
    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnector.in_flight()
    }

    /// Number of reconnection attempts started so far
    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.reconnector.attempts()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Stop background tasks and close the link
    ///
    /// Waits for each task at most the configured grace period. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.cancel.is_cancelled() {
            info!("Shutting down connection supervisor");
        }
        shared.cancel.cancel();

        let grace = shared.config.shutdown_grace;
        let monitor = self.monitor.lock().take();
        if let Some(task) = monitor {
            join_within(task, grace, "monitor").await;
        }
        if let Some(task) = shared.reconnector.take_task() {
            join_within(task, grace, "reconnection").await;
        }

        let taken = shared.state.lock().await.take();
        if let Some((port, link)) = taken {
            close_link(link).await;
            debug!("Closed connection to {}", port);
        }
        shared.recovery_pending.store(false, Ordering::SeqCst);
    }
}

impl<T: Transport> Drop for Connector<T> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Write a command and collect its response
async fn exchange<L: SerialLink>(
    link: &mut L,
    command: &str,
    config: &LinkConfig,
) -> Result<Option<String>, LinkError> {
    let timeout = config.timeout();
    let message = HostMessage::Command(command.to_string());
    write_all_within(link, &message.encode(), timeout)
        .await
        .map_err(|e| LinkError::from_io(e, timeout))?;

    tokio::time::sleep(config.command_delay).await;

    let response = read_response(link, timeout).await?;
    if !response.has_content() {
        return Ok(None);
    }
    if let Err(e) = response.decode() {
        warn!("Response to {:?} is not valid UTF-8: {}", command, e);
    }
    Ok(Some(response.decode_lossy()))
}

async fn join_within(mut task: JoinHandle<()>, grace: Duration, name: &str) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} task ended abnormally: {}", name, e),
        Err(_) => {
            warn!("{} task did not stop within {:?}, aborting", name, grace);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_sim::{IdentityReply, Responder, SimTransport, VirtualDeviceConfig};

    const PORT: &str = "/dev/ttyACM0";

    fn fast_config() -> LinkConfig {
        LinkConfig::new("Venus")
            .with_timeout(Duration::from_millis(200))
            .with_settle_delay(Duration::from_millis(1))
            .with_ack_delay(Duration::from_millis(1))
            .with_command_delay(Duration::from_millis(1))
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(10))
            // Keep the monitor out of the way
            .with_monitor_interval(Duration::from_secs(60))
    }

    async fn find_device(
        shared: &Shared<SimTransport>,
    ) -> Discovered<<SimTransport as Transport>::Link> {
        discover(
            &shared.transport,
            &shared.config.discovery,
            DiscoverOptions::silent(),
            &shared.cancel,
        )
        .await
        .unwrap()
    }

    fn sim_with(device: VirtualDeviceConfig) -> SimTransport {
        let sim = SimTransport::new();
        sim.add_port(PORT, "Arduino Uno", device);
        sim
    }

    #[tokio::test]
    async fn test_send_before_discover() {
        let connector = Connector::new(sim_with(VirtualDeviceConfig::default()), fast_config());
        assert_eq!(connector.send("PING").await, None);
        assert!(connector.latest(1).is_empty());
        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_discover_then_send() {
        let connector = Connector::new(sim_with(VirtualDeviceConfig::default()), fast_config());

        assert_eq!(connector.discover().await.as_deref(), Some(PORT));
        assert_eq!(connector.send("LED ON").await.as_deref(), Some("ACK:LED ON"));
        assert_eq!(connector.latest(5), vec!["ACK:LED ON"]);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_discover_when_connected_returns_current_port() {
        let sim = sim_with(VirtualDeviceConfig::default());
        let connector = Connector::new(sim.clone(), fast_config());

        connector.discover().await;
        assert_eq!(connector.discover().await.as_deref(), Some(PORT));
        assert_eq!(sim.open_count(PORT), 1);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_responder_leaves_state() {
        let device = VirtualDeviceConfig::named("Venus").with_responder(Responder::Silent);
        let connector = Connector::new(sim_with(device), fast_config());
        connector.discover().await;

        assert_eq!(connector.send("PING").await, None);
        assert!(connector.is_connected().await);
        assert_eq!(connector.history_len(), 0);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_ascii_response() {
        let device = VirtualDeviceConfig::named("Venus").with_responder(Responder::Fixed(
            "caf\u{e9}".to_string(),
        ));
        let connector = Connector::new(sim_with(device), fast_config());
        connector.discover().await;

        assert_eq!(connector.send("X").await.as_deref(), Some("caf\u{e9}"));
        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_disconnects() {
        let sim = sim_with(VirtualDeviceConfig::default());
        let connector = Connector::new(sim.clone(), fast_config());
        connector.discover().await;
        let mut events = connector.subscribe();

        sim.break_links(PORT);
        assert_eq!(connector.send("X").await, None);
        assert!(!connector.is_connected().await);

        match events.recv().await.unwrap() {
            LinkEvent::Disconnected { port, .. } => assert_eq!(port, PORT),
            other => panic!("unexpected event {:?}", other),
        }
        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_identity_not_connected() {
        let device = VirtualDeviceConfig {
            identity: IdentityReply::Text("I am Mars".into()),
            responder: Responder::Silent,
        };
        let connector = Connector::new(sim_with(device), fast_config());

        assert_eq!(connector.discover().await, None);
        assert!(!connector.is_connected().await);
        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_check_connection() {
        let sim = sim_with(VirtualDeviceConfig::default());
        let connector = Connector::new(sim.clone(), fast_config());
        assert!(!connector.check_connection().await);

        connector.discover().await;
        assert!(connector.check_connection().await);

        sim.remove_port(PORT);
        assert!(!connector.check_connection().await);
        connector.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loss_reported_before_next_connection() {
        let sim = SimTransport::new();
        sim.add_port("COM3", "USB Serial", VirtualDeviceConfig::default());
        sim.add_port("COM4", "USB Serial", VirtualDeviceConfig::default());
        let shared = Arc::new(Shared::new(sim, fast_config()));

        let first = find_device(&shared).await;
        assert_eq!(shared.establish(first, false).await.as_deref(), Some("COM3"));
        // COM3 is held, so this finds the other device
        let second = find_device(&shared).await;
        assert_eq!(second.port, "COM4");

        let log = Arc::new(SyncMutex::new(Vec::new()));
        let down = log.clone();
        shared.callbacks.set_disconnect(Arc::new(move |port| {
            down.lock().push(format!("down {}", port));
            std::thread::sleep(Duration::from_millis(100));
            down.lock().push("down done".to_string());
        }));
        let up = log.clone();
        shared
            .callbacks
            .set_reconnect(Arc::new(move |port| up.lock().push(format!("up {}", port))));
        let mut events = shared.events.subscribe();

        let losing = Arc::clone(&shared);
        let loss = tokio::spawn(async move {
            let state = losing.state.lock().await;
            losing
                .lose_connection(state, LinkError::PortUnavailable("COM3".into()))
                .await;
        });
        // Let the disconnect callback start before recovery finishes
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shared.establish(second, true).await.as_deref(), Some("COM4"));
        loss.await.unwrap();

        assert_eq!(*log.lock(), vec!["down COM3", "down done", "up COM4"]);
        assert!(matches!(
            events.recv().await.unwrap(),
            LinkEvent::Disconnected { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Reconnected { port: "COM4".into() }
        );
        assert!(!shared.recovery_pending());
    }

    #[tokio::test]
    async fn test_connected_event_precedes_disconnected() {
        let sim = sim_with(VirtualDeviceConfig::default());
        let connector = Connector::new(sim.clone(), fast_config());
        let mut events = connector.subscribe();

        connector.discover().await;
        sim.break_links(PORT);
        assert_eq!(connector.send("X").await, None);

        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Connected { port: PORT.into() }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            LinkEvent::Disconnected { .. }
        ));
        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let sim = sim_with(VirtualDeviceConfig::default());
        let connector = Connector::new(sim.clone(), fast_config());
        connector.discover().await;

        connector.shutdown().await;
        connector.shutdown().await;

        assert!(!connector.is_connected().await);
        assert!(!sim.is_open(PORT));
        assert_eq!(connector.send("X").await, None);
        assert_eq!(connector.discover().await, None);
    }
}
