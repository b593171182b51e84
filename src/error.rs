//! Error types for veneer crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of where a failure happened.
///
/// Callers use this to decide whether retrying with another fingerprint
/// profile or another host makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    /// Bad caller input (unknown profile, malformed URL or header).
    Input,
    /// Dial, timeout or I/O failure.
    Network,
    /// TLS negotiation or certificate failure.
    Tls,
    /// HTTP-level failure after the TLS session was established.
    Application,
}

/// Errors that can occur while connecting and exchanging a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The HelloID is not catalogued in the fingerprint registry.
    #[error("Unknown fingerprint profile: {0}")]
    UnknownProfile(String),

    /// The request could not be built (bad URL, scheme or header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// TCP connect failed or exceeded the connect budget.
    #[error("Dial failed for {addr}: {reason}")]
    DialFailed { addr: String, reason: String },

    /// Overall handshake or exchange budget exceeded.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// TLS negotiation failed (alert, decode error, unsupported parameters).
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// Certificate chain or name validation failed.
    #[error("Certificate invalid: {0}")]
    CertificateInvalid(String),

    /// The server selected an ALPN protocol this client cannot speak.
    #[error("Unsupported ALPN protocol: {0:?}")]
    UnsupportedAlpn(String),

    /// I/O failure on an established connection.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed HTTP framing or response.
    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),
}

impl Error {
    /// Create a handshake failure.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::HandshakeFailed(message.into())
    }

    /// Create a certificate validation failure.
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::CertificateInvalid(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a dial failure for an address.
    pub fn dial(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::DialFailed {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a transport error with custom message.
    pub fn transport(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::Transport(io::Error::new(kind, message.into()))
    }

    /// Which layer this error belongs to.
    pub fn layer(&self) -> ErrorLayer {
        match self {
            Self::UnknownProfile(_) | Self::InvalidRequest(_) => ErrorLayer::Input,
            Self::DialFailed { .. } | Self::Timeout(_) | Self::Transport(_) => {
                ErrorLayer::Network
            }
            Self::HandshakeFailed(_) | Self::CertificateInvalid(_) => ErrorLayer::Tls,
            Self::UnsupportedAlpn(_) | Self::Protocol(_) | Self::Decompression(_) => {
                ErrorLayer::Application
            }
        }
    }

    /// Convert into an `io::Error` for the `AsyncRead`/`AsyncWrite` surface.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Self::Transport(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers() {
        assert_eq!(Error::UnknownProfile("x".into()).layer(), ErrorLayer::Input);
        assert_eq!(Error::dial("a:1", "refused").layer(), ErrorLayer::Network);
        assert_eq!(
            Error::Timeout(Duration::from_secs(1)).layer(),
            ErrorLayer::Network
        );
        assert_eq!(Error::handshake("alert").layer(), ErrorLayer::Tls);
        assert_eq!(Error::certificate("expired").layer(), ErrorLayer::Tls);
        assert_eq!(
            Error::UnsupportedAlpn("spdy/3".into()).layer(),
            ErrorLayer::Application
        );
        assert_eq!(Error::protocol("bad").layer(), ErrorLayer::Application);
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.into_io().kind(), io::ErrorKind::ConnectionReset);

        let err = Error::handshake("bad record mac").into_io();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
