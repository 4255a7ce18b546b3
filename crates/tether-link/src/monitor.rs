//! Liveness monitor
//!
//! A background task that wakes up every monitor interval. While a device
//! is connected it checks that the port is still enumerated and writes a
//! ping; any failure goes through the single disconnect path. While a lost
//! connection is still unrecovered it keeps asking for a reconnection.

use std::sync::Arc;

use tether_detect::{write_all_within, Transport};
use tether_protocol::HostMessage;
use tracing::{debug, trace};

use crate::config::MIN_MONITOR_INTERVAL;
use crate::error::LinkError;
use crate::link::Shared;
use crate::reconnect;

/// Result of one liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// No device connected, nothing to check
    Idle,
    /// Port present and the ping was written
    Healthy,
    /// Enumeration failed; nothing can be concluded this time
    Inconclusive,
    /// The connection was lost during this check
    Lost,
}

pub(crate) async fn run_monitor<T: Transport>(shared: Arc<Shared<T>>) {
    // Public field, so the builder's clamp is not guaranteed
    let interval = shared.config.monitor_interval.max(MIN_MONITOR_INTERVAL);
    debug!("Liveness monitor started, interval {:?}", interval);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // Discovery owns the port while an attempt runs
        if shared.reconnector.in_flight() {
            continue;
        }

        let probe = check_connection(&shared).await;
        trace!("Liveness check: {:?}", probe);

        if shared.recovery_pending() && shared.auto_reconnect_enabled() {
            reconnect::trigger(&shared);
        }
    }

    debug!("Liveness monitor stopped");
}

/// Check the current connection once
///
/// Ports are enumerated on the blocking pool without the state lock, since
/// a real enumeration scans the system's device tree. The ping is written
/// under the lock so commands and probes never interleave on the link.
pub(crate) async fn check_connection<T: Transport>(shared: &Arc<Shared<T>>) -> Probe {
    if !shared.state.lock().await.is_connected() {
        return Probe::Idle;
    }

    let listing = Arc::clone(shared);
    let ports = match tokio::task::spawn_blocking(move || listing.transport.enumerate()).await {
        Ok(Ok(ports)) => ports,
        Ok(Err(e)) => {
            debug!("Cannot enumerate ports for liveness check: {}", e);
            return Probe::Inconclusive;
        }
        Err(e) => {
            debug!("Port enumeration task failed: {}", e);
            return Probe::Inconclusive;
        }
    };

    // The connection may have changed while enumerating
    let mut state = shared.state.lock().await;
    let Some(port) = state.port().map(str::to_owned) else {
        return Probe::Idle;
    };
    if !ports.iter().any(|p| p.port == port) {
        shared
            .lose_connection(state, LinkError::PortUnavailable(port))
            .await;
        return Probe::Lost;
    }

    let Some(link) = state.link_mut() else {
        return Probe::Idle;
    };
    let timeout = shared.config.timeout();
    match write_all_within(link, &HostMessage::Ping.encode(), timeout).await {
        Ok(()) => Probe::Healthy,
        Err(e) => {
            shared
                .lose_connection(state, LinkError::from_io(e, timeout))
                .await;
            Probe::Lost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use std::time::Duration;
    use tether_detect::{discover, DiscoverOptions};
    use tether_sim::{SimTransport, VirtualDeviceConfig};
    use tokio_util::sync::CancellationToken;

    async fn connected_shared() -> (SimTransport, Arc<Shared<SimTransport>>) {
        let sim = SimTransport::new();
        sim.add_port("/dev/ttyACM0", "Arduino Uno", VirtualDeviceConfig::named("Venus"));
        let config = LinkConfig::new("Venus")
            .with_timeout(Duration::from_millis(200))
            .with_settle_delay(Duration::from_millis(1))
            .with_ack_delay(Duration::from_millis(1))
            .with_max_retries(1);
        let shared = Arc::new(Shared::new(sim.clone(), config));

        let found = discover(
            &shared.transport,
            &shared.config.discovery,
            DiscoverOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(shared.establish(found, false).await.is_some());
        (sim, shared)
    }

    #[tokio::test]
    async fn test_idle_when_disconnected() {
        let shared = Arc::new(Shared::new(SimTransport::new(), LinkConfig::new("Venus")));
        assert_eq!(check_connection(&shared).await, Probe::Idle);
    }

    #[tokio::test]
    async fn test_healthy_probe_writes_ping() {
        let (sim, shared) = connected_shared().await;

        assert_eq!(check_connection(&shared).await, Probe::Healthy);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            sim.received("/dev/ttyACM0").last(),
            Some(&HostMessage::Ping)
        );
    }

    #[tokio::test]
    async fn test_missing_port_is_lost() {
        let (sim, shared) = connected_shared().await;
        sim.remove_port("/dev/ttyACM0");

        assert_eq!(check_connection(&shared).await, Probe::Lost);
        assert!(!shared.state.lock().await.is_connected());
        assert!(shared.recovery_pending());

        // Only the first detector performs the transition
        assert_eq!(check_connection(&shared).await, Probe::Idle);
    }

    #[tokio::test]
    async fn test_failed_ping_is_lost() {
        let (sim, shared) = connected_shared().await;
        sim.break_links("/dev/ttyACM0");

        assert_eq!(check_connection(&shared).await, Probe::Lost);
        assert!(!shared.state.lock().await.is_connected());
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_inconclusive() {
        let (sim, shared) = connected_shared().await;
        sim.set_enumeration_fails(true);

        assert_eq!(check_connection(&shared).await, Probe::Inconclusive);
        assert!(shared.state.lock().await.is_connected());
    }
}
