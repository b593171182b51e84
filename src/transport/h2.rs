//! HTTP/2 exchange through a hyper client connection.

use std::io;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::fingerprint::Http2Settings;
use crate::request::Request;
use crate::response::Response;
use crate::version::HttpVersion;

/// Request headers that are meaningless or forbidden in HTTP/2.
const STRIPPED: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

fn build_request(request: &Request) -> Result<http::Request<Full<Bytes>>> {
    request.validate_headers()?;
    let uri = format!("https://{}{}", request.authority(), request.path_and_query());
    let mut builder = http::Request::builder()
        .method(request.method().clone())
        .uri(uri);

    let headers = builder
        .headers_mut()
        .ok_or_else(|| Error::invalid_request("invalid method or URL"))?;
    for (name, value) in request.headers() {
        if STRIPPED.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        // TE is only allowed as "trailers"
        if name.eq_ignore_ascii_case("te") && !value.eq_ignore_ascii_case("trailers") {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_request(format!("invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::invalid_request(format!("invalid header value: {}", e)))?;
        headers.append(name, value);
    }

    let body = request.body_bytes().cloned().unwrap_or_default();
    builder
        .body(Full::new(body))
        .map_err(|e| Error::invalid_request(format!("failed to build request: {}", e)))
}

/// Map a hyper error onto the crate's layers.
///
/// Failures of the underlying stream, or of the connection that carried the
/// request, are `Transport`; everything else is an HTTP/2 `Protocol` error.
fn classify(context: &str, err: hyper::Error) -> Error {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Error::Transport(io::Error::new(
                io_err.kind(),
                format!("{}: {}", context, io_err),
            ));
        }
        source = cause.source();
    }
    if err.is_closed() || err.is_canceled() || err.is_incomplete_message() {
        return Error::Transport(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("{}: {}", context, err),
        ));
    }
    Error::protocol(format!("{}: {}", context, err))
}

/// Run one request on a fresh HTTP/2 connection over `stream`.
///
/// The connection task owns the stream. Once the body is collected the
/// sender is dropped so the task finishes and releases the stream before
/// this returns (bounded by `settings.shutdown_grace`).
pub(crate) async fn send_request<S>(
    stream: S,
    request: &Request,
    settings: &Http2Settings,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let hyper_request = build_request(request)?;

    let mut builder = http2::Builder::new(TokioExecutor::new());
    settings.apply(&mut builder);
    let (mut sender, conn) = builder
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| classify("HTTP/2 handshake failed", e))?;

    let mut conn_task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("HTTP/2 connection closed with error: {}", e);
        }
    });

    let result = async {
        let response = sender
            .send_request(hyper_request)
            .await
            .map_err(|e| classify("HTTP/2 request failed", e))?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| classify("failed to read HTTP/2 body", e))?
            .to_bytes();

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok::<_, Error>(Response::new(parts.status.as_u16(), headers, body, HttpVersion::Http2))
    }
    .await;

    drop(sender);
    if tokio::time::timeout(settings.shutdown_grace, &mut conn_task).await.is_err() {
        tracing::debug!("HTTP/2 connection task did not finish within grace period");
        conn_task.abort();
    }
    result
}
