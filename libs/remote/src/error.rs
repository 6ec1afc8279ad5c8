//! RPC Transport Error Types

use thiserror::Error;

use object::ObjectError;
use proxy::ProxyError;

/// Main RPC transport error type
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The connection latch is down; no further I/O is attempted
    #[error("Connection inactive")]
    ConnectionInactive,

    /// Stream-level I/O failure
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Framing violation: oversized or malformed frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Well-framed but semantically invalid message
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Environment construction handshake was rejected by the peer
    #[error("Handshake error: {message}")]
    Handshake { message: String },

    /// Value codec failure while marshalling a message
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// Proxy-layer failure while executing a server-side action
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Whether this error is the peer closing the stream between messages.
    pub fn is_clean_close(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<RemoteError> for ProxyError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::ConnectionInactive => ProxyError::ConnectionInactive,
            RemoteError::Object(e) => ProxyError::Object(e),
            RemoteError::Proxy(e) => e,
            other => ProxyError::environment("remote", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_detection() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        assert!(RemoteError::from(eof).is_clean_close());

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no");
        assert!(!RemoteError::from(refused).is_clean_close());
        assert!(!RemoteError::ConnectionInactive.is_clean_close());
    }

    #[test]
    fn test_inactive_maps_to_proxy_inactive() {
        let err: ProxyError = RemoteError::ConnectionInactive.into();
        assert!(matches!(err, ProxyError::ConnectionInactive));
    }
}
