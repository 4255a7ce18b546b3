//! Program settings
//!
//! Settings come from a JSON file and are then overridden by command-line
//! flags. Every field has a default, so a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_detect::{PortScanner, ScannerConfig};
use tether_link::LinkConfig;
use tether_sim::{SimTransport, VirtualDeviceConfig};

use crate::error::CliError;

/// A port added to the simulated transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulatedPort {
    pub port: String,
    #[serde(default)]
    pub description: String,
    /// Device behind the port; a silent device when omitted
    #[serde(default = "VirtualDeviceConfig::silent")]
    pub device: VirtualDeviceConfig,
}

/// Program settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Identity token the device must send
    pub identity: String,
    pub baud_rate: u32,
    /// Per-operation timeout in milliseconds
    pub timeout_ms: u64,
    /// Discovery rounds
    pub max_retries: u32,
    /// Delay between discovery rounds in milliseconds
    pub retry_delay_ms: u64,
    /// Ports whose name or description contains one of these are skipped
    pub skip_patterns: Vec<String>,
    /// Liveness probe interval in milliseconds
    pub monitor_interval_ms: u64,
    pub auto_reconnect: bool,
    /// Command sent on every iteration
    pub command: String,
    /// Delay between commands in milliseconds; zero is treated as 1
    pub command_interval_ms: u64,
    /// Ports for `--simulate`; a demo set is used when empty
    pub simulated_ports: Vec<SimulatedPort>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            identity: "Venus".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 3000,
            skip_patterns: vec!["Bluetooth".to_string(), "BT".to_string()],
            monitor_interval_ms: 2000,
            auto_reconnect: true,
            command: "PING".to_string(),
            command_interval_ms: 1000,
            simulated_ports: Vec::new(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for tether
    /// Uses $XDG_CONFIG_HOME/tether on Linux/macOS, falls back to ~/.config/tether
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("tether"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("tether"))
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// means default settings.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| CliError::ReadSettings {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| CliError::ParseSettings { path, source })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let write_err = |source| CliError::WriteSettings {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(write_err)
    }

    /// Supervisor configuration for these settings
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(self.identity.clone())
            .with_baud_rate(self.baud_rate)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_skip_patterns(self.skip_patterns.iter().cloned())
            .with_monitor_interval(Duration::from_millis(self.monitor_interval_ms))
            .with_auto_reconnect(self.auto_reconnect)
    }

    /// Port filter built from the configured skip patterns
    pub fn scanner(&self) -> PortScanner {
        PortScanner::with_config(ScannerConfig {
            skip_patterns: self.skip_patterns.clone(),
        })
    }

    pub fn command_interval(&self) -> Duration {
        // tokio rejects a zero interval period
        Duration::from_millis(self.command_interval_ms.max(1))
    }

    /// Simulated transport for `--simulate`
    pub fn simulation(&self) -> SimTransport {
        if self.simulated_ports.is_empty() {
            return SimTransport::demo(&self.identity);
        }

        let sim = SimTransport::new();
        for p in &self.simulated_ports {
            sim.add_port(&p.port, &p.description, p.device.clone());
        }
        sim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_detect::Transport;

    #[test]
    fn test_defaults_match_link_defaults() {
        let settings = Settings::default();
        let from_settings = settings.link_config();
        let defaults = LinkConfig::new("Venus");

        assert_eq!(from_settings.identity(), defaults.identity());
        assert_eq!(from_settings.timeout(), defaults.timeout());
        assert_eq!(from_settings.monitor_interval, defaults.monitor_interval);
        assert_eq!(
            from_settings.discovery.scanner.skip_patterns,
            defaults.discovery.scanner.skip_patterns
        );
        assert_eq!(from_settings.discovery.retry_delay, defaults.discovery.retry_delay);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings = Settings::from_json(r#"{ "identity": "Mars", "timeout_ms": 250 }"#).unwrap();

        assert_eq!(settings.identity, "Mars");
        assert_eq!(settings.timeout_ms, 250);
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.command, "PING");
    }

    #[tokio::test]
    async fn test_zero_intervals_are_raised() {
        let settings =
            Settings::from_json(r#"{ "command_interval_ms": 0, "monitor_interval_ms": 0 }"#)
                .unwrap();

        assert_eq!(settings.command_interval(), Duration::from_millis(1));
        let mut ticker = tokio::time::interval(settings.command_interval());
        ticker.tick().await;

        assert_eq!(
            settings.link_config().monitor_interval,
            tether_link::MIN_MONITOR_INTERVAL
        );
    }

    #[test]
    fn test_simulated_ports_from_json() {
        let settings = Settings::from_json(
            r#"{
                "simulated_ports": [
                    { "port": "SIM0" },
                    {
                        "port": "SIM1",
                        "description": "Arduino Uno",
                        "device": {
                            "identity": { "kind": "text", "value": "Venus here" },
                            "responder": { "kind": "fixed", "value": "OK" }
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(settings.simulated_ports.len(), 2);
        assert_eq!(settings.simulated_ports[0].device, VirtualDeviceConfig::silent());

        let ports = settings.simulation().enumerate().unwrap();
        assert_eq!(ports[1].port, "SIM1");
        assert_eq!(ports[1].description, "Arduino Uno");
    }

    #[test]
    fn test_scanner_uses_skip_patterns() {
        let settings = Settings {
            skip_patterns: vec!["ACM".to_string()],
            ..Settings::default()
        };
        let ports = settings.simulation().enumerate().unwrap();
        let scanner = settings.scanner();

        let acm = ports.iter().find(|p| p.port == "/dev/ttyACM0").unwrap();
        assert!(scanner.should_skip(acm));
        assert!(!Settings::default().scanner().should_skip(acm));
    }

    #[test]
    fn test_empty_simulation_uses_demo() {
        let ports = Settings::default().simulation().enumerate().unwrap();
        assert_eq!(ports.len(), 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("tether-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = Settings {
            identity: "Mars".to_string(),
            ..Settings::default()
        };

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let path = Path::new("/nonexistent/tether/settings.json");
        assert!(matches!(
            Settings::load(Some(path)),
            Err(CliError::ReadSettings { .. })
        ));
    }
}
