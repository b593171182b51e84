//! Parameters agreed by a completed handshake.

use rustls_pki_types::CertificateDer;

use crate::fingerprint::HelloId;
use crate::version::TlsVersion;

/// What the handshake negotiated. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSession {
    pub version: TlsVersion,
    pub cipher_suite: u16,
    /// ALPN token chosen by the server; empty when none was selected.
    pub alpn: String,
    /// Server chain as sent, end-entity first.
    pub peer_certificates: Vec<CertificateDer<'static>>,
    pub hello_id: HelloId,
    /// Host the connection was made for (also used for name checks).
    pub server_name: String,
    /// Key exchange group.
    pub group: u16,
    /// Whether the server sent a HelloRetryRequest.
    pub hello_retry: bool,
}

impl NegotiatedSession {
    /// ALPN token, `None` when the server did not select one.
    pub fn alpn(&self) -> Option<&str> {
        if self.alpn.is_empty() {
            None
        } else {
            Some(&self.alpn)
        }
    }
}
