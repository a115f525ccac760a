//! Error types for the proxy.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a session.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport I/O error, including short reads during the handshake
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Handshake deadline expired
    #[error("handshake timed out after {0}ms")]
    Timeout(u64),

    /// Credentials did not match the configured pair
    #[error("authentication failed")]
    Authentication,

    /// Request carried a command other than CONNECT
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    /// Outbound connection to the requested target failed
    #[error("dial failed: {0}")]
    Dial(std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error was reported to the client on the wire before
    /// the transport was closed.
    ///
    /// Every other session error closes the transport silently.
    pub fn has_wire_reply(&self) -> bool {
        matches!(self, Error::Authentication | Error::Dial(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Authentication;
        assert_eq!(err.to_string(), "authentication failed");

        let err = Error::Timeout(5000);
        assert_eq!(err.to_string(), "handshake timed out after 5000ms");

        let err = Error::UnsupportedCommand(0x03);
        assert_eq!(err.to_string(), "unsupported command 0x03");
    }

    #[test]
    fn test_wire_reply_classification() {
        assert!(Error::Authentication.has_wire_reply());
        assert!(Error::Dial(std::io::Error::other("refused")).has_wire_reply());
        assert!(!Error::UnsupportedCommand(0x02).has_wire_reply());
        assert!(!Error::Timeout(1000).has_wire_reply());
    }
}
