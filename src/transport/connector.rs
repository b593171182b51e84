//! Fingerprinted TLS connector.
//!
//! Dials TCP and runs the handshake with the ClientHello of one HelloID.
//! The profile is resolved when the connector is built, so an unknown
//! HelloID fails before any I/O.

use rustls_pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::fingerprint::{self, ClientHelloSpec, HelloId};
use crate::timeouts::{with_deadline, Timeouts};
use crate::transport::session::NegotiatedSession;
use crate::transport::tcp::dial;
use crate::transport::tls::handshake::{client_handshake, HandshakeConfig, HandshakeState, StateTracker};
use crate::transport::tls::verify::{parse_certificates, CertVerifier};
use crate::transport::tls::TlsStream;

/// Application protocol selected through ALPN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// The server did not select a protocol.
    None,
    /// Anything else the server picked from our offer.
    Other(String),
}

impl AlpnProtocol {
    pub fn from_token(token: &str) -> Self {
        match token {
            "h2" => Self::H2,
            "http/1.1" => Self::Http1,
            "" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }

    /// Check if HTTP/2 was negotiated.
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }
}

impl NegotiatedSession {
    /// The negotiated protocol as an enum.
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        AlpnProtocol::from_token(&self.alpn)
    }
}

/// Builder for [`TlsConnector`].
#[derive(Debug, Clone)]
pub struct TlsConnectorBuilder {
    hello_id: HelloId,
    timeouts: Timeouts,
    root_certs: Vec<Vec<u8>>,
    verify_certificates: bool,
}

impl TlsConnectorBuilder {
    pub fn hello_id(mut self, hello_id: HelloId) -> Self {
        self.hello_id = hello_id;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Trust an extra root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certs.push(cert.into());
        self
    }

    /// Skip chain and name verification. Handshake signatures are still
    /// checked against the presented certificate.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.verify_certificates = !accept;
        self
    }

    pub fn build(self) -> Result<TlsConnector> {
        let spec = fingerprint::lookup(&self.hello_id)?;
        let mut roots: Vec<CertificateDer<'static>> = Vec::new();
        for data in &self.root_certs {
            roots.extend(parse_certificates(data)?);
        }
        let verifier = CertVerifier::new(&roots, self.verify_certificates)?;
        Ok(TlsConnector {
            hello_id: self.hello_id,
            spec,
            verifier,
            timeouts: self.timeouts,
        })
    }
}

/// TLS connector that presents the ClientHello of one HelloID.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    hello_id: HelloId,
    spec: &'static ClientHelloSpec,
    verifier: CertVerifier,
    timeouts: Timeouts,
}

impl TlsConnector {
    /// Connector with default timeouts and the bundled roots.
    pub fn new(hello_id: HelloId) -> Result<Self> {
        Self::builder(hello_id).build()
    }

    pub fn builder(hello_id: HelloId) -> TlsConnectorBuilder {
        TlsConnectorBuilder {
            hello_id,
            timeouts: Timeouts::defaults(),
            root_certs: Vec::new(),
            verify_certificates: true,
        }
    }

    pub fn hello_id(&self) -> &HelloId {
        &self.hello_id
    }

    pub fn spec(&self) -> &'static ClientHelloSpec {
        self.spec
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Dial `host:port` and complete a TLS handshake.
    ///
    /// The dial is bounded by the connect budget, dial plus handshake by the
    /// handshake budget.
    pub async fn handshake(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(TlsStream<TcpStream>, NegotiatedSession)> {
        let mut tracker = StateTracker::new(host);
        let attempt = async {
            tracker.advance(HandshakeState::Dialing);
            let tcp = dial(host, port, self.timeouts.connect).await?;
            tracker.advance(HandshakeState::SpecResolved);
            client_handshake(tcp, &self.config(host), &mut tracker).await
        };
        let result = with_deadline(self.timeouts.handshake, attempt).await;
        if let Err(e) = &result {
            tracker.fail(e);
        }
        result
    }

    /// Run the handshake over a stream that is already connected.
    ///
    /// `server_name` is used for SNI (unless it is an IP literal) and for
    /// certificate name checks.
    pub async fn handshake_over<S>(
        &self,
        stream: S,
        server_name: &str,
    ) -> Result<(TlsStream<S>, NegotiatedSession)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut tracker = StateTracker::new(server_name);
        tracker.advance(HandshakeState::SpecResolved);
        let config = self.config(server_name);
        let attempt = client_handshake(stream, &config, &mut tracker);
        let result = with_deadline(self.timeouts.handshake, attempt).await;
        if let Err(e) = &result {
            tracker.fail(e);
        }
        result
    }

    fn config<'a>(&'a self, host: &'a str) -> HandshakeConfig<'a> {
        HandshakeConfig {
            spec: self.spec,
            hello_id: &self.hello_id,
            host,
            verifier: &self.verifier,
        }
    }
}
