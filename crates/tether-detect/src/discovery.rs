//! Device discovery
//!
//! Discovery walks every enumerated port, runs the identity handshake on
//! each one and keeps the first port whose device authenticates. Rounds are
//! repeated a bounded number of times with a delay in between, and the whole
//! search can be abandoned through a cancellation token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handshake::{authenticate, HandshakeConfig, HandshakeOutcome};
use crate::scanner::{PortScanner, ScannerConfig};
use crate::transport::{close_link, Transport};

/// Log at `info` normally and at `debug` when running silently
macro_rules! report {
    ($silent:expr, $($arg:tt)+) => {
        if $silent {
            debug!($($arg)+);
        } else {
            info!($($arg)+);
        }
    };
}

/// Configuration for discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Handshake parameters (identity token and timing)
    pub handshake: HandshakeConfig,
    /// Baud rate ports are opened at
    pub baud_rate: u32,
    /// Number of full rounds over all ports
    pub max_retries: u32,
    /// Delay between rounds
    pub retry_delay: Duration,
    /// Port filter
    pub scanner: ScannerConfig,
}

impl DiscoveryConfig {
    /// Create a configuration with default settings for the given identity
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            handshake: HandshakeConfig::new(identity),
            baud_rate: 9600,
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
            scanner: ScannerConfig::default(),
        }
    }

    /// Per-operation timeout (port open and handshake reply)
    pub fn timeout(&self) -> Duration {
        self.handshake.timeout
    }
}

/// Per-call discovery options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverOptions {
    /// Skip ports matching the scanner's filter patterns
    pub skip_filtered: bool,
    /// Demote progress logging to debug level
    pub silent: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            skip_filtered: true,
            silent: false,
        }
    }
}

impl DiscoverOptions {
    /// Options used for background reconnection
    pub fn silent() -> Self {
        Self {
            skip_filtered: true,
            silent: true,
        }
    }
}

/// An authenticated port together with its open link
#[derive(Debug)]
pub struct Discovered<L> {
    /// Port name
    pub port: String,
    /// Open, acknowledged link
    pub link: L,
}

/// Search all ports for the expected device
///
/// Returns `None` when every round was exhausted or `cancel` fired.
pub async fn discover<T: Transport>(
    transport: &T,
    config: &DiscoveryConfig,
    options: DiscoverOptions,
    cancel: &CancellationToken,
) -> Option<Discovered<T::Link>> {
    let silent = options.silent;
    let scanner = PortScanner::with_config(config.scanner.clone());
    let mut round = 0;

    while round < config.max_retries && !cancel.is_cancelled() {
        if let Some(found) = discover_round(transport, config, &scanner, options, cancel).await {
            return Some(found);
        }

        round += 1;
        if round < config.max_retries && !cancel.is_cancelled() {
            report!(
                silent,
                "Attempt {}/{} failed. Retrying in {:?}...",
                round,
                config.max_retries,
                config.retry_delay
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.retry_delay) => {}
            }
        }
    }

    if cancel.is_cancelled() {
        debug!("Discovery cancelled");
    } else {
        report!(silent, "Device not found. Make sure it is connected properly.");
    }
    None
}

/// One pass over every enumerated port
async fn discover_round<T: Transport>(
    transport: &T,
    config: &DiscoveryConfig,
    scanner: &PortScanner,
    options: DiscoverOptions,
    cancel: &CancellationToken,
) -> Option<Discovered<T::Link>> {
    let silent = options.silent;

    let ports = match transport.enumerate() {
        Ok(ports) => ports,
        Err(e) => {
            report!(silent, "Port enumeration failed: {}", e);
            return None;
        }
    };

    for port in ports {
        if cancel.is_cancelled() {
            return None;
        }

        if options.skip_filtered && scanner.should_skip(&port) {
            report!(silent, "Skipping filtered port {} ({})", port.port, port.description);
            continue;
        }

        let mut link = match transport.open(&port.port, config.baud_rate, config.timeout()) {
            Ok(link) => link,
            Err(e) => {
                report!(silent, "Port {} is already in use or unavailable: {}", port.port, e);
                continue;
            }
        };
        report!(silent, "Trying to connect to {}...", port.port);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = authenticate(&mut link, &config.handshake) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            close_link(link).await;
            return None;
        };

        match outcome {
            Ok(HandshakeOutcome::Authenticated { reply }) => {
                report!(silent, "Received response: '{}'", reply);
                report!(silent, "Device authenticated on {}", port.port);
                return Some(Discovered {
                    port: port.port,
                    link,
                });
            }
            Ok(HandshakeOutcome::Rejected { reply }) => {
                report!(silent, "Invalid identity from {}: '{}'", port.port, reply);
            }
            Ok(HandshakeOutcome::NoResponse) => {
                report!(silent, "No valid response from {}. Moving to next port.", port.port);
            }
            Ok(HandshakeOutcome::Malformed(e)) => {
                report!(silent, "Error decoding data from {}: {}", port.port, e);
            }
            Err(e) => {
                report!(silent, "I/O error on {} during handshake: {}", port.port, e);
            }
        }

        close_link(link).await;
    }

    None
}
