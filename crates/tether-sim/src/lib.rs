//! Tether Simulation Library
//!
//! This crate provides a simulation layer for exercising the connection
//! supervisor without physical hardware. It includes:
//!
//! - **SimTransport**: an in-memory port set with hot-plug and busy control
//! - **Virtual devices**: firmware stand-ins that answer the identity
//!   challenge and reply to commands
//!
//! # Example
//!
//! ```rust
//! use tether_detect::Transport;
//! use tether_sim::{SimTransport, VirtualDeviceConfig};
//!
//! let sim = SimTransport::new();
//! sim.add_port("/dev/ttyACM0", "Arduino Uno", VirtualDeviceConfig::named("Venus"));
//!
//! let ports = sim.enumerate().unwrap();
//! assert_eq!(ports[0].port, "/dev/ttyACM0");
//!
//! // Unplugging removes the port and breaks its open links
//! sim.remove_port("/dev/ttyACM0");
//! assert!(sim.enumerate().unwrap().is_empty());
//! ```

pub mod device;
pub mod transport;

pub use device::{run_virtual_device, IdentityReply, ReceivedLog, Responder, VirtualDeviceConfig};
pub use transport::{SimLink, SimTransport};
