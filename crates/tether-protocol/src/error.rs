//! Error types for protocol decoding

use thiserror::Error;

/// Errors that can occur while decoding device output
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Device sent bytes that are not valid UTF-8
    #[error("invalid UTF-8 after {valid_up_to} bytes")]
    InvalidUtf8 { valid_up_to: usize },

    /// A line grew past the codec's limit without a terminator
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}
