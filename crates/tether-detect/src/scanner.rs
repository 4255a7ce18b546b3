//! Serial port scanner
//!
//! This module describes enumerated ports and decides which of them are
//! worth probing.

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tracing::{debug, info};

use crate::error::DetectError;
use crate::transport::Transport;

/// Information about an enumerated port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// Human-readable description
    pub description: String,
    /// USB Vendor ID (if USB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    /// USB manufacturer string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// USB serial number (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortDescriptor {
    /// Create a descriptor with only a name and description
    pub fn new(port: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            description: description.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            serial_number: None,
        }
    }

    /// Create from serialport crate's port info
    pub(crate) fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "USB Serial Device".to_string());
                Self {
                    port: name,
                    description,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    manufacturer: usb.manufacturer.clone(),
                    serial_number: usb.serial_number.clone(),
                }
            }
            SerialPortType::BluetoothPort => Self::new(name, "Bluetooth Device"),
            SerialPortType::PciPort => Self::new(name, "PCI Serial Port"),
            SerialPortType::Unknown => Self::new(name, "n/a"),
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Skip ports whose name or description contains one of these patterns
    pub skip_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Wireless-class ports ("Bluetooth" descriptions, "BT" names)
                "Bluetooth".to_string(),
                "BT".to_string(),
            ],
        }
    }
}

/// Serial port scanner
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with the default wireless-port filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate all ports known to the transport, unfiltered
    pub fn enumerate_ports<T: Transport>(
        &self,
        transport: &T,
    ) -> Result<Vec<PortDescriptor>, DetectError> {
        let ports = transport.enumerate()?;

        if ports.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", ports.len());
            for port in &ports {
                info!("  {} - {}", port.port, port.description);
            }
        }

        Ok(ports)
    }

    /// Check if a port should be skipped
    ///
    /// Matching is a case-sensitive substring test against both the port
    /// name and its description.
    pub fn should_skip(&self, port: &PortDescriptor) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern) || port.description.contains(pattern))
    }

    /// Remove skipped ports from a list
    pub fn filter(&self, ports: Vec<PortDescriptor>) -> Vec<PortDescriptor> {
        ports
            .into_iter()
            .filter(|p| {
                let skip = self.should_skip(p);
                if skip {
                    debug!("Skipping filtered port {} ({})", p.port, p.description);
                }
                !skip
            })
            .collect()
    }
}
