//! Identity handshake
//!
//! After a port is opened the host sends a challenge and expects the device
//! to answer with text containing a known identity token. Only then is the
//! device acknowledged and the port trusted.

use std::io;
use std::time::Duration;

use tether_protocol::{identity_matches, HostMessage, ProtocolError};
use tracing::trace;

use crate::transport::{read_response, write_all_within, SerialLink};

/// Delay after clearing buffers before the challenge is written
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Delay after the acknowledgment so the device can finish reacting to it
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(500);

/// Parameters for a single handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Token the identity reply must contain
    pub identity: String,
    /// Maximum time to wait for the reply
    pub timeout: Duration,
    /// Delay between clearing buffers and writing the challenge
    pub settle_delay: Duration,
    /// Delay after writing the acknowledgment
    pub ack_delay: Duration,
}

impl HandshakeConfig {
    /// Create a handshake configuration with default timing
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            timeout: Duration::from_secs(1),
            settle_delay: DEFAULT_SETTLE_DELAY,
            ack_delay: DEFAULT_ACK_DELAY,
        }
    }
}

/// Result of a handshake attempt on one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Reply contained the identity token; acknowledgment was sent
    Authenticated {
        /// Decoded reply text
        reply: String,
    },
    /// Device answered with something else
    Rejected {
        /// Decoded reply text
        reply: String,
    },
    /// Nothing arrived before the timeout
    NoResponse,
    /// Reply was not valid UTF-8
    Malformed(ProtocolError),
}

/// Run the challenge/acknowledgment exchange on an open link
///
/// I/O errors are returned to the caller; every other outcome, including a
/// wrong identity, is reported through [`HandshakeOutcome`].
pub async fn authenticate<L: SerialLink>(
    link: &mut L,
    config: &HandshakeConfig,
) -> io::Result<HandshakeOutcome> {
    link.clear_buffers()?;
    tokio::time::sleep(config.settle_delay).await;

    trace!("Sending identity challenge");
    write_all_within(link, &HostMessage::Challenge.encode(), config.timeout).await?;

    let response = read_response(link, config.timeout).await?;
    if !response.has_content() {
        return Ok(HandshakeOutcome::NoResponse);
    }

    let reply = match response.decode() {
        Ok(Some(text)) => text,
        // Deadline passed in the middle of a multi-byte sequence
        Ok(None) => response.decode_lossy(),
        Err(e) => return Ok(HandshakeOutcome::Malformed(e)),
    };

    if !identity_matches(&reply, &config.identity) {
        return Ok(HandshakeOutcome::Rejected { reply });
    }

    trace!("Sending authentication acknowledgment");
    write_all_within(link, &HostMessage::AuthSuccess.encode(), config.timeout).await?;
    tokio::time::sleep(config.ack_delay).await;

    Ok(HandshakeOutcome::Authenticated { reply })
}
