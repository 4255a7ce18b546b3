//! Transport abstraction
//!
//! The supervisor never talks to the operating system directly. It asks a
//! [`Transport`] to enumerate and open ports and gets back a [`SerialLink`]:
//! any async byte stream that can also discard its buffered data. Real ports
//! go through [`SerialTransport`]; tests and the demo use an in-memory
//! transport.

use std::io::{self, ErrorKind};
use std::time::Duration;

use serialport::available_ports;
use tether_protocol::ResponseBuffer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::error::DetectError;
use crate::scanner::PortDescriptor;

/// An open, bidirectional connection to a port
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Discard any bytes buffered in either direction
    fn clear_buffers(&mut self) -> io::Result<()>;
}

impl SerialLink for SerialStream {
    fn clear_buffers(&mut self) -> io::Result<()> {
        SerialPort::clear(&*self, ClearBuffer::All).map_err(io::Error::from)
    }
}

/// Source of ports: enumeration plus opening by name
pub trait Transport: Send + Sync + 'static {
    /// Link type produced by [`Transport::open`]
    type Link: SerialLink;

    /// List the ports currently present
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, DetectError>;

    /// Open a port at the given baud rate
    ///
    /// Must be called from within a Tokio runtime.
    fn open(&self, port: &str, baud_rate: u32, timeout: Duration)
        -> Result<Self::Link, DetectError>;
}

/// Transport over the host's real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl SerialTransport {
    /// Create a new serial transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SerialTransport {
    type Link = SerialStream;

    fn enumerate(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| PortDescriptor::from_serialport(p.port_name, &p.port_type))
            .collect())
    }

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self::Link, DetectError> {
        debug!("Opening {} at {} baud", port, baud_rate);

        tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::Io(ErrorKind::PermissionDenied)
                | tokio_serial::ErrorKind::Io(ErrorKind::AddrInUse) => {
                    DetectError::PortBusy(port.to_string())
                }
                _ => DetectError::OpenFailed {
                    port: port.to_string(),
                    reason: e.to_string(),
                },
            })
    }
}

/// Close a link, ignoring any error from the close itself
pub async fn close_link<L: SerialLink>(mut link: L) {
    if let Err(e) = link.shutdown().await {
        trace!("Ignoring error while closing link: {}", e);
    }
}

/// Read one reply from a link, waiting at most `timeout`
///
/// Reading stops as soon as a terminated line with non-whitespace content has
/// arrived, when the peer closes the stream, or when the deadline passes.
/// Whatever was collected is returned; an empty buffer means the peer stayed
/// silent.
pub async fn read_response<L>(link: &mut L, timeout: Duration) -> io::Result<ResponseBuffer>
where
    L: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout;
    let mut response = ResponseBuffer::new();
    let mut buf = [0u8; 256];

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        match tokio::time::timeout(deadline - now, link.read(&mut buf)).await {
            Ok(Ok(0)) => {
                trace!("Link closed by peer");
                break;
            }
            Ok(Ok(n)) => {
                trace!("Read {} bytes: {:?}", n, String::from_utf8_lossy(&buf[..n]));
                response.push_bytes(&buf[..n]);
                if response.is_complete() && response.has_content() {
                    break;
                }
            }
            // Native serial reads report an expired port timeout this way
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }
    }

    Ok(response)
}

/// Write a full payload and flush it, failing if it takes longer than `timeout`
pub async fn write_all_within<L>(link: &mut L, data: &[u8], timeout: Duration) -> io::Result<()>
where
    L: AsyncWrite + Unpin,
{
    let write = async {
        link.write_all(data).await?;
        link.flush().await
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(ErrorKind::TimedOut, "write timed out")),
    }
}
