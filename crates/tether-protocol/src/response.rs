//! Device response accumulation
//!
//! Replies can arrive split across several reads. [`ResponseBuffer`]
//! collects the bytes and decodes them once a caller decides the reply is
//! finished (a terminator arrived or its deadline passed).

use crate::error::ProtocolError;
use crate::LINE_TERMINATOR;

/// Accumulates the bytes of a single device reply
#[derive(Debug, Default, Clone)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
}

impl ResponseBuffer {
    /// Create an empty response buffer
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(64),
        }
    }

    /// Append bytes read from the device
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// True once the reply contains a line terminator
    pub fn is_complete(&self) -> bool {
        self.bytes.contains(&LINE_TERMINATOR)
    }

    /// True if the reply holds anything besides whitespace
    pub fn has_content(&self) -> bool {
        self.bytes.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Number of bytes collected so far
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing has been received
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Strictly decode the reply as trimmed UTF-8
    ///
    /// Returns `Ok(None)` when nothing was received yet or the buffer ends in
    /// the middle of a multi-byte sequence, and an error for bytes that can
    /// never become valid UTF-8.
    pub fn decode(&self) -> Result<Option<String>, ProtocolError> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.error_len().is_none() => Ok(None),
            Err(e) => Err(ProtocolError::InvalidUtf8 {
                valid_up_to: e.valid_up_to(),
            }),
        }
    }

    /// Decode the reply as trimmed UTF-8, replacing malformed sequences
    pub fn decode_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}
