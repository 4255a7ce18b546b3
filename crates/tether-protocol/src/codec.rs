//! Streaming line codec
//!
//! Splits a byte stream into newline-terminated lines. Bytes may arrive in
//! arbitrary chunks; a line is only produced once its terminator is seen.

use crate::error::ProtocolError;
use crate::LINE_TERMINATOR;

/// Maximum line length (reasonable limit to prevent unbounded growth)
const MAX_LINE_LEN: usize = 1024;

/// Newline-delimited text codec
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
}

impl LineCodec {
    /// Create a new line codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Push raw bytes into the codec's buffer
    ///
    /// If the buffer grows past the line limit without a terminator, the
    /// buffered bytes are discarded and [`ProtocolError::LineTooLong`] is
    /// returned. The codec stays usable afterwards.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > MAX_LINE_LEN && !self.buffer.contains(&LINE_TERMINATOR) {
            self.buffer.clear();
            return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
        }
        Ok(())
    }

    /// Try to extract the next complete line
    ///
    /// The terminator and an optional preceding `\r` are stripped. Invalid
    /// UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == LINE_TERMINATOR)?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Number of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
