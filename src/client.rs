//! HTTP client facade: one fingerprinted TLS connection per request.

use http::Method;

use crate::error::Result;
use crate::fingerprint::{HelloId, Http2Settings};
use crate::request::Request;
use crate::response::Response;
use crate::timeouts::Timeouts;
use crate::transport::connector::{TlsConnector, TlsConnectorBuilder};
use crate::transport::dispatch::exchange_with;
use crate::transport::session::NegotiatedSession;

/// HTTP client that presents the ClientHello of one HelloID.
///
/// Each request dials a new connection, completes a handshake, runs one
/// exchange over whatever protocol ALPN selected and drops the connection.
#[derive(Debug, Clone)]
pub struct Client {
    connector: TlsConnector,
    http2_settings: Http2Settings,
}

/// Builder for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    connector: TlsConnectorBuilder,
    http2_settings: Http2Settings,
}

/// Builder for one request, sent with [`RequestBuilder::send`].
///
/// URL errors are reported by `send`.
pub struct RequestBuilder<'a> {
    client: &'a Client,
    request: Result<Request>,
}

impl Client {
    /// Client with default settings for `hello_id`.
    pub fn new(hello_id: HelloId) -> Result<Self> {
        Self::builder().hello_id(hello_id).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn hello_id(&self) -> &HelloId {
        self.connector.hello_id()
    }

    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            request: Request::new(method, url),
        }
    }

    pub async fn execute(&self, request: &Request) -> Result<Response> {
        Ok(self.execute_with_session(request).await?.1)
    }

    /// Send `request` and also return what the handshake negotiated.
    pub async fn execute_with_session(&self, request: &Request) -> Result<(NegotiatedSession, Response)> {
        request.validate_headers()?;
        let (stream, session) = self
            .connector
            .handshake(&request.host(), request.port())
            .await?;
        let response = exchange_with(
            stream,
            &session,
            request,
            &self.http2_settings,
            self.connector.timeouts().exchange,
        )
        .await?;
        Ok((session, response))
    }
}

impl<'a> RequestBuilder<'a> {
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.map(|r| r.header(key, value));
        self
    }

    pub fn body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.request = self.request.map(|r| r.body(body));
        self
    }

    pub async fn send(self) -> Result<Response> {
        let request = self.request?;
        self.client.execute(&request).await
    }

    pub async fn send_with_session(self) -> Result<(NegotiatedSession, Response)> {
        let request = self.request?;
        self.client.execute_with_session(&request).await
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            connector: TlsConnector::builder(HelloId::default()),
            http2_settings: Http2Settings::default(),
        }
    }

    /// Set the fingerprint profile.
    pub fn hello_id(mut self, hello_id: HelloId) -> Self {
        self.connector = self.connector.hello_id(hello_id);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.connector = self.connector.timeouts(timeouts);
        self
    }

    /// Trust an extra root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.connector = self.connector.add_root_certificate(cert);
        self
    }

    /// Skip chain and name verification.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.connector = self.connector.danger_accept_invalid_certs(accept);
        self
    }

    /// Set HTTP/2 settings used when ALPN selects h2.
    pub fn http2_settings(mut self, settings: Http2Settings) -> Self {
        self.http2_settings = settings;
        self
    }

    /// Fails with `UnknownProfile` for an uncatalogued HelloID and with
    /// `CertificateInvalid` for unusable root certificates.
    pub fn build(self) -> Result<Client> {
        Ok(Client {
            connector: self.connector.build()?,
            http2_settings: self.http2_settings,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch `url` with the ClientHello of `hello_id` using default settings.
pub async fn fetch(url: &str, hello_id: HelloId) -> Result<Response> {
    Client::new(hello_id)?.get(url).send().await
}
