//! Lifecycle notifications
//!
//! Transitions are reported two ways: through the caller's disconnect and
//! reconnect callbacks, and as [`LinkEvent`]s on a broadcast channel that
//! any number of observers can subscribe to.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A caller-initiated discovery connected to a port
    Connected {
        /// Port the device was found on
        port: String,
    },

    /// A connected device was lost
    Disconnected {
        /// Port the device was on
        port: String,
        /// What the failure detector saw
        reason: String,
    },

    /// Background recovery connected to a port
    Reconnected {
        /// Port the device was found on
        port: String,
    },

    /// A background recovery attempt found no device
    ReconnectFailed {
        /// Attempt number, starting at 1
        attempt: u64,
    },
}

/// Callback receiving a port name
pub type PortCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Registered disconnect and reconnect callbacks
#[derive(Default)]
pub(crate) struct Callbacks {
    on_disconnect: RwLock<Option<PortCallback>>,
    on_reconnect: RwLock<Option<PortCallback>>,
}

impl Callbacks {
    pub(crate) fn set_disconnect(&self, callback: PortCallback) {
        *self.on_disconnect.write() = Some(callback);
    }

    pub(crate) fn set_reconnect(&self, callback: PortCallback) {
        *self.on_reconnect.write() = Some(callback);
    }

    pub(crate) fn fire_disconnect(&self, port: &str) {
        // Clone out so the callback runs without the lock held
        let callback = self.on_disconnect.read().clone();
        if let Some(callback) = callback {
            callback(port);
        }
    }

    pub(crate) fn fire_reconnect(&self, port: &str) {
        let callback = self.on_reconnect.read().clone();
        if let Some(callback) = callback {
            callback(port);
        }
    }
}

/// Broadcast sender for [`LinkEvent`]s
pub(crate) struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        if self.tx.send(event).is_err() {
            trace!("Link event dropped, no subscribers");
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_callbacks_receive_port() {
        let callbacks = Callbacks::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Firing with nothing registered is a no-op
        callbacks.fire_disconnect("COM3");

        let log = seen.clone();
        callbacks.set_disconnect(Arc::new(move |port| log.lock().push(format!("down {}", port))));
        let log = seen.clone();
        callbacks.set_reconnect(Arc::new(move |port| log.lock().push(format!("up {}", port))));

        callbacks.fire_disconnect("COM3");
        callbacks.fire_reconnect("COM4");

        assert_eq!(*seen.lock(), vec!["down COM3", "up COM4"]);
    }

    #[test]
    fn test_callback_may_reregister() {
        let callbacks = Arc::new(Callbacks::default());
        let inner = callbacks.clone();
        callbacks.set_disconnect(Arc::new(move |_| {
            inner.set_disconnect(Arc::new(|_| {}));
        }));

        // Would deadlock if the lock were held during the call
        callbacks.fire_disconnect("COM3");
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::default();
        bus.emit(LinkEvent::ReconnectFailed { attempt: 1 });

        let mut rx = bus.subscribe();
        bus.emit(LinkEvent::Connected { port: "COM3".into() });

        assert_eq!(
            rx.recv().await.unwrap(),
            LinkEvent::Connected { port: "COM3".into() }
        );
    }
}
