//! Error types for the connection supervisor

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Reasons a link operation failed
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write did not complete in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connected port has disappeared from enumeration
    #[error("port no longer available: {0}")]
    PortUnavailable(String),
}

impl LinkError {
    /// Classify an I/O error from an operation bounded by `timeout`
    pub fn from_io(err: io::Error, timeout: Duration) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            LinkError::Timeout(timeout)
        } else {
            LinkError::Io(err)
        }
    }
}
