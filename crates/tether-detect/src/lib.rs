//! Tether Port Detection Library
//!
//! This crate enumerates serial ports, filters out ports that cannot host
//! the device (wireless-class ports by default) and finds the expected
//! device by running an identity handshake on each remaining port.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_detect::{discover, DiscoverOptions, DiscoveryConfig, SerialTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let transport = SerialTransport::new();
//! let config = DiscoveryConfig::new("Venus");
//!
//! match discover(&transport, &config, DiscoverOptions::default(), &CancellationToken::new()).await {
//!     Some(found) => println!("Device on {}", found.port),
//!     None => println!("Device not found"),
//! }
//! # }
//! ```

pub mod discovery;
pub mod error;
pub mod handshake;
pub mod scanner;
pub mod transport;

pub use discovery::{discover, DiscoverOptions, Discovered, DiscoveryConfig};
pub use error::DetectError;
pub use handshake::{authenticate, HandshakeConfig, HandshakeOutcome};
pub use scanner::{PortDescriptor, PortScanner, ScannerConfig};
pub use transport::{
    close_link, read_response, write_all_within, SerialLink, SerialTransport, Transport,
};
