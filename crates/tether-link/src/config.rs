//! Supervisor configuration

use std::time::Duration;

use tether_detect::DiscoveryConfig;

/// Default interval between liveness probes
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Shortest liveness interval; anything below is raised to this
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// Default delay between writing a command and reading its response
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_millis(100);

/// Default time shutdown waits for each background task
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Configuration for a [`Connector`](crate::Connector)
///
/// Fixed once the connector is built.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Discovery and handshake settings
    pub discovery: DiscoveryConfig,
    /// Interval between liveness probes, at least [`MIN_MONITOR_INTERVAL`]
    /// when the monitor runs
    pub monitor_interval: Duration,
    /// Delay between writing a command and reading its response
    pub command_delay: Duration,
    /// How long shutdown waits for each background task
    pub shutdown_grace: Duration,
    /// Whether a lost connection is recovered automatically
    pub auto_reconnect: bool,
}

impl LinkConfig {
    /// Default configuration for a device identifying itself with `identity`
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            discovery: DiscoveryConfig::new(identity),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            command_delay: DEFAULT_COMMAND_DELAY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            auto_reconnect: true,
        }
    }

    /// Expected identity token
    pub fn identity(&self) -> &str {
        &self.discovery.handshake.identity
    }

    /// Per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.discovery.timeout()
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.discovery.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.discovery.handshake.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.discovery.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.discovery.retry_delay = delay;
        self
    }

    /// Replace the patterns used to filter out ports
    pub fn with_skip_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discovery.scanner.skip_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.discovery.handshake.settle_delay = delay;
        self
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.discovery.handshake.ack_delay = delay;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval.max(MIN_MONITOR_INTERVAL);
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
