//! Simulated transport
//!
//! [`SimTransport`] is an in-memory set of ports. Each port carries a
//! virtual device configuration; opening the port spawns the device on the
//! far end of a `tokio::io::duplex` pair. Ports can be plugged, unplugged
//! and marked busy while a supervisor is running against them.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tether_detect::{DetectError, PortDescriptor, SerialLink, Transport};
use tether_protocol::HostMessage;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::{debug, info};

use crate::device::{run_virtual_device, ReceivedLog, VirtualDeviceConfig};

/// Buffer size of each simulated link
const LINK_BUFFER_SIZE: usize = 1024;

/// One simulated port
struct SimPort {
    descriptor: PortDescriptor,
    device: VirtualDeviceConfig,
    busy: bool,
    /// Set when the port is unplugged; shared with its open links
    unplugged: Arc<AtomicBool>,
    /// Set while a link to this port is open
    in_use: Arc<AtomicBool>,
}

#[derive(Default)]
struct SimState {
    ports: Vec<SimPort>,
    logs: HashMap<String, ReceivedLog>,
    open_counts: HashMap<String, usize>,
    enumeration_fails: bool,
}

impl SimState {
    fn port(&self, name: &str) -> Option<&SimPort> {
        self.ports.iter().find(|p| p.descriptor.port == name)
    }

    fn port_mut(&mut self, name: &str) -> Option<&mut SimPort> {
        self.ports.iter_mut().find(|p| p.descriptor.port == name)
    }
}

/// In-memory transport with hot-pluggable virtual devices
///
/// Cloning yields another handle to the same set of ports.
#[derive(Clone, Default)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let ports: Vec<_> = state.ports.iter().map(|p| &p.descriptor.port).collect();
        f.debug_struct("SimTransport").field("ports", &ports).finish()
    }
}

impl SimTransport {
    /// Create a transport with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Two wireless-class ports plus one port hosting a device named `token`
    pub fn demo(token: &str) -> Self {
        let sim = Self::new();
        sim.add_port(
            "/dev/cu.Bluetooth-Incoming-Port",
            "Bluetooth Incoming Port",
            VirtualDeviceConfig::silent(),
        );
        sim.add_port("COM9 BT", "Standard Serial over Bluetooth link", VirtualDeviceConfig::silent());
        sim.add_port("/dev/ttyACM0", "Arduino Uno", VirtualDeviceConfig::named(token));
        sim
    }

    /// Plug in a port, replacing any port with the same name
    pub fn add_port(&self, port: &str, description: &str, device: VirtualDeviceConfig) {
        let mut state = self.state.lock();
        if let Some(old) = state.port(port) {
            old.unplugged.store(true, Ordering::SeqCst);
        }
        state.ports.retain(|p| p.descriptor.port != port);
        state.ports.push(SimPort {
            descriptor: PortDescriptor::new(port, description),
            device,
            busy: false,
            unplugged: Arc::new(AtomicBool::new(false)),
            in_use: Arc::new(AtomicBool::new(false)),
        });
        state.logs.entry(port.to_string()).or_default();
        info!("Simulated port {} plugged in", port);
    }

    /// Unplug a port: it leaves enumeration and its open links start failing
    pub fn remove_port(&self, port: &str) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.ports.iter().position(|p| p.descriptor.port == port) else {
            return false;
        };
        let removed = state.ports.remove(index);
        removed.unplugged.store(true, Ordering::SeqCst);
        info!("Simulated port {} unplugged", port);
        true
    }

    /// Make open links to a port fail while the port stays enumerated
    pub fn break_links(&self, port: &str) {
        let mut state = self.state.lock();
        if let Some(p) = state.port_mut(port) {
            p.unplugged.store(true, Ordering::SeqCst);
            // Later opens get a healthy link again
            p.unplugged = Arc::new(AtomicBool::new(false));
            p.in_use.store(false, Ordering::SeqCst);
            p.in_use = Arc::new(AtomicBool::new(false));
        }
    }

    /// Mark a port as held by another process
    pub fn set_busy(&self, port: &str, busy: bool) {
        if let Some(p) = self.state.lock().port_mut(port) {
            p.busy = busy;
        }
    }

    /// Make every enumeration fail
    pub fn set_enumeration_fails(&self, fails: bool) {
        self.state.lock().enumeration_fails = fails;
    }

    /// Messages the devices on a port have received, across all plug-ins
    pub fn received(&self, port: &str) -> Vec<HostMessage> {
        self.state
            .lock()
            .logs
            .get(port)
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Device configuration behind a port
    pub fn device_config(&self, port: &str) -> Option<VirtualDeviceConfig> {
        self.state.lock().port(port).map(|p| p.device.clone())
    }

    /// Number of times a port was successfully opened
    pub fn open_count(&self, port: &str) -> usize {
        self.state.lock().open_counts.get(port).copied().unwrap_or(0)
    }

    /// True while a link to the port is open
    pub fn is_open(&self, port: &str) -> bool {
        self.state
            .lock()
            .port(port)
            .map(|p| p.in_use.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Transport for SimTransport {
    type Link = SimLink;

    fn enumerate(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        let state = self.state.lock();
        if state.enumeration_fails {
            return Err(DetectError::EnumerationFailed(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok(state.ports.iter().map(|p| p.descriptor.clone()).collect())
    }

    fn open(&self, port: &str, baud_rate: u32, _timeout: Duration) -> Result<SimLink, DetectError> {
        let mut state = self.state.lock();

        let Some(sim_port) = state.port(port) else {
            return Err(DetectError::OpenFailed {
                port: port.to_string(),
                reason: "no such port".to_string(),
            });
        };
        if sim_port.busy || sim_port.in_use.swap(true, Ordering::SeqCst) {
            return Err(DetectError::PortBusy(port.to_string()));
        }

        let (host, device) = tokio::io::duplex(LINK_BUFFER_SIZE);
        let unplugged = sim_port.unplugged.clone();
        let in_use = sim_port.in_use.clone();
        let config = sim_port.device.clone();
        let log = state.logs.entry(port.to_string()).or_default().clone();
        *state.open_counts.entry(port.to_string()).or_default() += 1;

        debug!("Opened simulated port {} at {} baud", port, baud_rate);
        tokio::spawn(run_virtual_device(device, config, log, unplugged.clone()));

        Ok(SimLink {
            stream: host,
            unplugged,
            in_use,
        })
    }
}

/// Host end of a simulated port
pub struct SimLink {
    stream: DuplexStream,
    unplugged: Arc<AtomicBool>,
    in_use: Arc<AtomicBool>,
}

impl SimLink {
    fn check_plugged(&self) -> io::Result<()> {
        if self.unplugged.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device has been disconnected",
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

impl AsyncRead for SimLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(e) = self.check_plugged() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SimLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(e) = self.check_plugged() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = self.check_plugged() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = self.check_plugged() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl SerialLink for SimLink {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.check_plugged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_detect::{discover, DiscoverOptions, DiscoveryConfig, HandshakeConfig};
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    fn fast_config(identity: &str) -> DiscoveryConfig {
        DiscoveryConfig {
            handshake: HandshakeConfig {
                identity: identity.to_string(),
                timeout: Duration::from_millis(200),
                settle_delay: Duration::from_millis(1),
                ack_delay: Duration::from_millis(1),
            },
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            ..DiscoveryConfig::new(identity)
        }
    }

    #[tokio::test]
    async fn test_enumerate_and_unplug() {
        let sim = SimTransport::demo("Venus");
        assert_eq!(sim.enumerate().unwrap().len(), 3);

        assert!(sim.remove_port("/dev/ttyACM0"));
        assert!(!sim.remove_port("/dev/ttyACM0"));
        assert_eq!(sim.enumerate().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_port_is_exclusive() {
        let sim = SimTransport::demo("Venus");
        let link = sim
            .open("/dev/ttyACM0", 9600, Duration::from_secs(1))
            .unwrap();
        assert!(sim.is_open("/dev/ttyACM0"));
        assert!(matches!(
            sim.open("/dev/ttyACM0", 9600, Duration::from_secs(1)),
            Err(DetectError::PortBusy(_))
        ));

        drop(link);
        assert!(!sim.is_open("/dev/ttyACM0"));
        assert!(sim.open("/dev/ttyACM0", 9600, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_busy_port_refuses_open() {
        let sim = SimTransport::demo("Venus");
        sim.set_busy("/dev/ttyACM0", true);
        assert!(matches!(
            sim.open("/dev/ttyACM0", 9600, Duration::from_secs(1)),
            Err(DetectError::PortBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_unplugged_link_fails_writes() {
        let sim = SimTransport::demo("Venus");
        let mut link = sim
            .open("/dev/ttyACM0", 9600, Duration::from_secs(1))
            .unwrap();
        link.write_all(b"\n").await.unwrap();

        sim.remove_port("/dev/ttyACM0");
        let err = link.write_all(b"\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_discovery_against_demo() {
        let sim = SimTransport::demo("Venus");
        let found = discover(
            &sim,
            &fast_config("Venus"),
            DiscoverOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.port, "/dev/ttyACM0");
        assert_eq!(sim.open_count("/dev/cu.Bluetooth-Incoming-Port"), 0);
        assert_eq!(sim.open_count("COM9 BT"), 0);

        // Give the device task a moment to log the acknowledgment
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            sim.received("/dev/ttyACM0"),
            vec![HostMessage::Challenge, HostMessage::AuthSuccess]
        );
    }
}
