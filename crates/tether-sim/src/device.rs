//! Virtual device simulation
//!
//! A virtual device sits on the far end of a simulated port and behaves
//! like the firmware the supervisor expects: it answers the identity
//! challenge, accepts the acknowledgment, ignores pings and replies to
//! commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_protocol::{HostMessage, LineCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace, warn};

/// How a device answers the identity challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IdentityReply {
    /// Send this text followed by a newline
    Text(String),
    /// Send raw bytes, typically invalid UTF-8
    Garbage(Vec<u8>),
    /// Never answer
    Silent,
}

/// How a device answers commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Responder {
    /// Reply with the command text behind a prefix
    Echo(String),
    /// Reply with the same text to every command
    Fixed(String),
    /// Never answer commands
    Silent,
}

/// Configuration for creating a virtual device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    /// Answer to the identity challenge
    pub identity: IdentityReply,
    /// Answer to commands
    pub responder: Responder,
}

impl VirtualDeviceConfig {
    /// A well-behaved device that identifies itself with `token`
    pub fn named(token: &str) -> Self {
        Self {
            identity: IdentityReply::Text(format!("Hello, my username is {}", token)),
            responder: Responder::Echo("ACK:".to_string()),
        }
    }

    /// A device that never answers anything
    pub fn silent() -> Self {
        Self {
            identity: IdentityReply::Silent,
            responder: Responder::Silent,
        }
    }

    /// Replace the command responder
    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self::named("Venus")
    }
}

/// Messages a device received, shared with the transport for inspection
pub type ReceivedLog = Arc<Mutex<Vec<HostMessage>>>;

/// Run a virtual device on one end of a duplex stream
///
/// Returns when the host closes its end or the port is unplugged.
pub async fn run_virtual_device(
    mut stream: DuplexStream,
    config: VirtualDeviceConfig,
    received: ReceivedLog,
    unplugged: Arc<AtomicBool>,
) {
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if unplugged.load(Ordering::SeqCst) {
            break;
        }

        if let Err(e) = codec.push_bytes(&buf[..n]) {
            warn!("Virtual device dropped input: {}", e);
        }
        while let Some(line) = codec.next_line() {
            let msg = HostMessage::from_line(&line);
            trace!("Virtual device received {:?}", msg);

            let reply = reply_for(&config, &msg);
            received.lock().push(msg);

            if let Some(reply) = reply {
                if stream.write_all(&reply).await.is_err() {
                    debug!("Virtual device lost its host");
                    return;
                }
            }
        }
    }

    debug!("Virtual device stopped");
}

/// Bytes the device writes back for a message, if any
fn reply_for(config: &VirtualDeviceConfig, msg: &HostMessage) -> Option<Vec<u8>> {
    match msg {
        HostMessage::Challenge => match &config.identity {
            IdentityReply::Text(text) => Some(format!("{}\n", text).into_bytes()),
            IdentityReply::Garbage(bytes) => Some(bytes.clone()),
            IdentityReply::Silent => None,
        },
        HostMessage::AuthSuccess | HostMessage::Ping => None,
        HostMessage::Command(cmd) => match &config.responder {
            Responder::Echo(prefix) => Some(format!("{}{}\n", prefix, cmd).into_bytes()),
            Responder::Fixed(text) => Some(format!("{}\n", text).into_bytes()),
            Responder::Silent => None,
        },
    }
}
