//! Picks the HTTP exchange from the negotiated ALPN token.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::fingerprint::Http2Settings;
use crate::request::Request;
use crate::response::Response;
use crate::timeouts::with_deadline;
use crate::transport::h1::H1Connection;
use crate::transport::h2;
use crate::transport::session::NegotiatedSession;
use crate::version::HttpVersion;

/// How a request is carried over an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Http1,
    Http2,
}

impl Exchange {
    /// `"h2"` is HTTP/2; `"http/1.1"` or no ALPN is HTTP/1.1; anything else
    /// is [`Error::UnsupportedAlpn`].
    pub fn for_alpn(token: &str) -> Result<Self> {
        match token {
            "h2" => Ok(Self::Http2),
            "http/1.1" | "" => Ok(Self::Http1),
            other => Err(Error::UnsupportedAlpn(other.to_string())),
        }
    }

    pub fn version(&self) -> HttpVersion {
        match self {
            Self::Http1 => HttpVersion::Http1_1,
            Self::Http2 => HttpVersion::Http2,
        }
    }
}

/// Perform one request/response over `stream` with default HTTP/2 settings
/// and no deadline.
pub async fn exchange<S>(stream: S, session: &NegotiatedSession, request: &Request) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    exchange_with(stream, session, request, &Http2Settings::default(), None).await
}

/// Like [`exchange`], with explicit HTTP/2 settings and an optional
/// deadline for the whole round trip.
///
/// The protocol is chosen before any I/O; the stream is consumed and
/// dropped on every path.
pub async fn exchange_with<S>(
    stream: S,
    session: &NegotiatedSession,
    request: &Request,
    settings: &Http2Settings,
    timeout: Option<Duration>,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let kind = Exchange::for_alpn(&session.alpn)?;
    tracing::debug!(
        exchange = ?kind,
        method = %request.method(),
        url = %request.url(),
        "starting exchange"
    );
    let response = with_deadline(timeout, async {
        match kind {
            Exchange::Http1 => {
                let mut conn = H1Connection::new(stream);
                let response = conn.send_request(request).await?;
                let mut stream = conn.into_inner();
                if let Err(e) = stream.shutdown().await {
                    tracing::trace!("shutdown after HTTP/1.1 exchange failed: {}", e);
                }
                Ok(response)
            }
            Exchange::Http2 => h2::send_request(stream, request, settings).await,
        }
    })
    .await?;
    tracing::debug!(status = response.status, version = kind.version().as_str(), "exchange complete");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::HelloId;
    use crate::version::TlsVersion;

    #[test]
    fn test_alpn_mapping() {
        assert_eq!(Exchange::for_alpn("h2").unwrap(), Exchange::Http2);
        assert_eq!(Exchange::for_alpn("http/1.1").unwrap(), Exchange::Http1);
        assert_eq!(Exchange::for_alpn("").unwrap(), Exchange::Http1);
        assert!(matches!(
            Exchange::for_alpn("spdy/3"),
            Err(Error::UnsupportedAlpn(token)) if token == "spdy/3"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_alpn_does_no_io() {
        let (client, mut server) = tokio::io::duplex(1024);
        let session = NegotiatedSession {
            version: TlsVersion::Tls13,
            cipher_suite: 0x1301,
            alpn: "spdy/3".into(),
            peer_certificates: Vec::new(),
            hello_id: HelloId::IOS_12_1,
            server_name: "example.com".into(),
            group: 0x001d,
            hello_retry: false,
        };
        let request = Request::get("https://example.com/").unwrap();
        let err = exchange(client, &session, &request).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlpn(_)));

        // client half was dropped without writing anything
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
