//! Tether Connection Supervisor
//!
//! This crate keeps a serial device connected. A [`Connector`] discovers
//! the device with an identity handshake, then:
//!
//! - **Monitors** the link in the background, checking that the port is
//!   still present and writing a ping every monitor interval
//! - **Reconnects** automatically when the link is lost, rerunning
//!   discovery on its own task
//! - **Exchanges commands**, keeping the last 20 responses
//! - **Reports** transitions through callbacks and a [`LinkEvent`] stream
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_detect::SerialTransport;
//! use tether_link::{Connector, LinkConfig};
//!
//! # async fn run() {
//! let connector = Connector::new(SerialTransport::new(), LinkConfig::new("Venus"));
//! connector.set_disconnect_callback(|port| println!("lost {}", port));
//! connector.set_reconnect_callback(|port| println!("back on {}", port));
//!
//! if connector.discover().await.is_some() {
//!     if let Some(response) = connector.send("LED ON").await {
//!         println!("{}", response);
//!     }
//! }
//! connector.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod link;
mod monitor;
mod reconnect;
pub mod state;

pub use config::{LinkConfig, MIN_MONITOR_INTERVAL};
pub use error::LinkError;
pub use events::{LinkEvent, PortCallback};
pub use history::{ResponseHistory, HISTORY_CAPACITY};
pub use link::Connector;
pub use state::ConnectionState;
