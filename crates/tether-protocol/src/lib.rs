//! Tether Protocol Library
//!
//! This crate provides the wire format spoken between the host and a
//! supervised serial device. The protocol is plain UTF-8 text with one
//! message per line:
//!
//! - **Challenge**: `Send your username:\n` asks the device to identify itself
//! - **Identity reply**: free-form text that must contain the expected token
//! - **Acknowledgment**: `AUTH_SUCCESS\n` confirms the device was accepted
//! - **Ping**: a lone `\n`, used as a liveness probe
//! - **Command**: `<text>\n`, answered by whatever text the device sends back
//!
//! # Example
//!
//! ```rust
//! use tether_protocol::{identity_matches, HostMessage, ResponseBuffer};
//!
//! assert_eq!(HostMessage::Challenge.encode(), b"Send your username:\n");
//!
//! let mut response = ResponseBuffer::new();
//! response.push_bytes(b"Hello, I am Venus\r\n");
//! assert!(response.is_complete());
//!
//! let text = response.decode().unwrap().unwrap();
//! assert!(identity_matches(&text, "Venus"));
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod response;

pub use codec::LineCodec;
pub use error::ProtocolError;
pub use message::{HostMessage, AUTH_SUCCESS, CHALLENGE, PING};
pub use response::ResponseBuffer;

/// Line terminator used by every message in both directions
pub const LINE_TERMINATOR: u8 = b'\n';

/// Check whether a decoded identity reply names the expected device
///
/// The match is a case-sensitive substring test; the text around the token is
/// free-form.
pub fn identity_matches(reply: &str, token: &str) -> bool {
    !token.is_empty() && reply.contains(token)
}
