//! Background reconnection
//!
//! A reconnection attempt reruns discovery on its own task so the monitor
//! keeps ticking. At most one attempt is in flight at a time: triggering
//! while one runs does nothing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_detect::{discover, DiscoverOptions, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::LinkEvent;
use crate::link::Shared;

/// Bookkeeping for the reconnection task
#[derive(Default)]
pub(crate) struct Reconnector {
    in_flight: Arc<AtomicBool>,
    attempts: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reconnector {
    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }

    /// Set the in-flight flag if it was clear
    fn try_begin(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(self.in_flight.clone()))
    }
}

/// Clears the in-flight flag when the attempt ends, however it ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Start a reconnection attempt unless one is already running
///
/// Returns true if a new attempt was started.
pub(crate) fn trigger<T: Transport>(shared: &Arc<Shared<T>>) -> bool {
    if shared.cancel.is_cancelled() {
        return false;
    }
    let Some(guard) = shared.reconnector.try_begin() else {
        debug!("Reconnection already in progress");
        return false;
    };

    let attempt = shared.reconnector.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    let mut slot = shared.reconnector.task.lock();
    let task_shared = Arc::clone(shared);
    *slot = Some(tokio::spawn(async move {
        let _guard = guard;
        run_attempt(&task_shared, attempt).await;
    }));
    true
}

async fn run_attempt<T: Transport>(shared: &Shared<T>, attempt: u64) {
    info!("Attempting to reconnect to device (attempt {})...", attempt);

    let found = discover(
        &shared.transport,
        &shared.config.discovery,
        DiscoverOptions::silent(),
        &shared.cancel,
    )
    .await;

    let Some(found) = found else {
        if !shared.cancel.is_cancelled() {
            warn!("Reconnection attempt {} found no device", attempt);
            shared.events.emit(LinkEvent::ReconnectFailed { attempt });
        }
        return;
    };

    if shared.establish(found, true).await.is_none() {
        debug!("Discarding reconnection result, already connected or shutting down");
    }
}
