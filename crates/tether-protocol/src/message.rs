//! Host-to-device messages
//!
//! Everything the host writes to a device is one of these messages. The
//! device side (see the simulator) parses received lines back into the same
//! enum with [`HostMessage::from_line`].

use crate::LINE_TERMINATOR;

/// Identification challenge sent right after a port is opened
pub const CHALLENGE: &[u8] = b"Send your username:\n";

/// Acknowledgment sent once the identity reply was accepted
pub const AUTH_SUCCESS: &[u8] = b"AUTH_SUCCESS\n";

/// Liveness probe payload
pub const PING: &[u8] = b"\n";

/// A message written by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// Ask the device for its identity: `Send your username:`
    Challenge,
    /// Accept the device: `AUTH_SUCCESS`
    AuthSuccess,
    /// Empty line used to probe the connection
    Ping,
    /// Free-form command text (without terminator)
    Command(String),
}

impl HostMessage {
    /// Encode this message to its wire format, including the terminator
    pub fn encode(&self) -> Vec<u8> {
        match self {
            HostMessage::Challenge => CHALLENGE.to_vec(),
            HostMessage::AuthSuccess => AUTH_SUCCESS.to_vec(),
            HostMessage::Ping => PING.to_vec(),
            HostMessage::Command(text) => {
                let mut bytes = Vec::with_capacity(text.len() + 1);
                bytes.extend_from_slice(text.as_bytes());
                bytes.push(LINE_TERMINATOR);
                bytes
            }
        }
    }

    /// Interpret a received line (terminator already stripped)
    pub fn from_line(line: &str) -> Self {
        match line {
            "" => HostMessage::Ping,
            "Send your username:" => HostMessage::Challenge,
            "AUTH_SUCCESS" => HostMessage::AuthSuccess,
            other => HostMessage::Command(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_messages() {
        assert_eq!(HostMessage::Challenge.encode(), b"Send your username:\n");
        assert_eq!(HostMessage::AuthSuccess.encode(), b"AUTH_SUCCESS\n");
        assert_eq!(HostMessage::Ping.encode(), b"\n");
    }

    #[test]
    fn test_command_gets_terminator() {
        assert_eq!(HostMessage::Command("PING".into()).encode(), b"PING\n");
    }

    #[test]
    fn test_from_line() {
        assert_eq!(HostMessage::from_line(""), HostMessage::Ping);
        assert_eq!(
            HostMessage::from_line("Send your username:"),
            HostMessage::Challenge
        );
        assert_eq!(
            HostMessage::from_line("AUTH_SUCCESS"),
            HostMessage::AuthSuccess
        );
        assert_eq!(
            HostMessage::from_line("LED ON"),
            HostMessage::Command("LED ON".into())
        );
    }
}
