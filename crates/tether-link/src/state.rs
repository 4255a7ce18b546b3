//! Connection state

/// Whether a device is connected, and over which link
///
/// A port name without a link, or a link without a port name, cannot be
/// represented.
#[derive(Debug)]
pub enum ConnectionState<L> {
    Disconnected,
    Connected {
        /// Port the device was found on
        port: String,
        /// Open, authenticated link
        link: L,
    },
}

impl<L> Default for ConnectionState<L> {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl<L> ConnectionState<L> {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Port name while connected
    pub fn port(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { port, .. } => Some(port),
            ConnectionState::Disconnected => None,
        }
    }

    /// Link while connected
    pub fn link_mut(&mut self) -> Option<&mut L> {
        match self {
            ConnectionState::Connected { link, .. } => Some(link),
            ConnectionState::Disconnected => None,
        }
    }

    /// Move to `Disconnected`, returning the port and link if there was one
    ///
    /// Only the first caller after a connect gets `Some`.
    pub fn take(&mut self) -> Option<(String, L)> {
        match std::mem::take(self) {
            ConnectionState::Connected { port, link } => Some((port, link)),
            ConnectionState::Disconnected => None,
        }
    }

    /// Move to `Connected`, returning whatever was connected before
    pub fn install(&mut self, port: String, link: L) -> Option<(String, L)> {
        let previous = self.take();
        *self = ConnectionState::Connected { port, link };
        previous
    }
}
