//! HTTP/1.1 exchange over an established stream.
//!
//! Requests are serialized by hand so header order is exactly what the
//! caller gave; responses are parsed with httparse.

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::version::HttpVersion;

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Maximum decoded size of a chunked response body (256MB).
const MAX_CHUNKED_BODY: usize = 256 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// One HTTP/1.1 request/response over `S`.
pub(crate) struct H1Connection<S> {
    stream: S,
    /// Bytes read from the stream but not consumed yet.
    buffer: Vec<u8>,
}

impl<S> H1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    pub(crate) fn into_inner(self) -> S {
        self.stream
    }

    /// Write the request and read one final response.
    pub(crate) async fn send_request(&mut self, request: &Request) -> Result<Response> {
        let head = encode_request(request)?;
        self.stream.write_all(&head).await?;
        if let Some(body) = request.body_bytes() {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        tracing::trace!(bytes = head.len(), "HTTP/1.1 request written");
        self.read_response(request.method()).await
    }

    /// Read more bytes into the buffer; 0 means end of stream.
    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn fill_or_fail(&mut self, what: &str) -> Result<()> {
        if self.fill().await? == 0 {
            return Err(Error::protocol(format!("connection closed while reading {}", what)));
        }
        Ok(())
    }

    /// Skips 1xx responses; the final response may follow in the same read.
    async fn read_response(&mut self, method: &Method) -> Result<Response> {
        loop {
            let (status, headers) = self.read_head().await?;
            if (100..200).contains(&status) {
                tracing::debug!(status, "skipping informational response");
                continue;
            }

            let has_body = !matches!(status, 204 | 304) && *method != Method::HEAD;
            let body = if has_body {
                self.read_body(&headers).await?
            } else {
                Bytes::new()
            };
            return Ok(Response::new(status, headers, body, HttpVersion::Http1_1));
        }
    }

    async fn read_head(&mut self) -> Result<(u16, Vec<(String, String)>)> {
        loop {
            let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
            let mut parsed = httparse::Response::new(&mut slots);
            match parsed
                .parse(&self.buffer)
                .map_err(|e| Error::protocol(format!("malformed response head: {}", e)))?
            {
                httparse::Status::Complete(len) => {
                    let status = parsed
                        .code
                        .ok_or_else(|| Error::protocol("missing status code"))?;
                    let headers = parsed
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).into_owned(),
                            )
                        })
                        .collect();
                    self.buffer.drain(..len);
                    return Ok((status, headers));
                }
                httparse::Status::Partial => {
                    if self.buffer.len() >= MAX_HEADERS_SIZE {
                        return Err(Error::protocol("response headers too large"));
                    }
                }
            }
            self.fill_or_fail("response headers").await?;
        }
    }

    /// Transfer-Encoding wins over Content-Length; without either the body
    /// runs to connection close.
    async fn read_body(&mut self, headers: &[(String, String)]) -> Result<Bytes> {
        let transfer_encoding = find_header_value(headers, "transfer-encoding");
        if let Some(te) = transfer_encoding {
            let chunked = te
                .split(',')
                .next_back()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
            if chunked {
                return self.read_chunked_body().await;
            }
            return self.read_until_close().await;
        }
        match find_header_value(headers, "content-length") {
            Some(value) => {
                let len = parse_content_length(value)?;
                self.read_fixed_body(len).await
            }
            None => self.read_until_close().await,
        }
    }

    async fn read_fixed_body(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            if self.fill().await? == 0 {
                return Err(Error::protocol(format!(
                    "connection closed before receiving full body (got {} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        Ok(Bytes::from(self.buffer.drain(..len).collect::<Vec<u8>>()))
    }

    async fn read_until_close(&mut self) -> Result<Bytes> {
        while self.fill().await? > 0 {}
        Ok(Bytes::from(std::mem::take(&mut self.buffer)))
    }

    /// chunked-body = *chunk last-chunk trailer-section CRLF
    async fn read_chunked_body(&mut self) -> Result<Bytes> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line("chunk size").await?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                // trailers up to the empty line
                while !self.read_line("trailers").await?.is_empty() {}
                return Ok(Bytes::from(body));
            }
            if size > MAX_CHUNKED_BODY - body.len() {
                return Err(Error::protocol(format!(
                    "chunked body exceeds {} bytes",
                    MAX_CHUNKED_BODY
                )));
            }
            let framed = size + 2;
            while self.buffer.len() < framed {
                self.fill_or_fail("chunk data").await?;
            }
            if &self.buffer[size..framed] != b"\r\n" {
                return Err(Error::protocol("chunk data not followed by CRLF"));
            }
            body.extend_from_slice(&self.buffer[..size]);
            self.buffer.drain(..framed);
        }
    }

    /// Next CRLF-terminated line, without the CRLF.
    async fn read_line(&mut self, what: &str) -> Result<Vec<u8>> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                let line = self.buffer[..pos].to_vec();
                self.buffer.drain(..pos + 2);
                return Ok(line);
            }
            if self.buffer.len() >= MAX_HEADERS_SIZE {
                return Err(Error::protocol(format!("{} line too long", what)));
            }
            self.fill_or_fail(what).await?;
        }
    }
}

/// Serialize the request line and headers.
///
/// `Host` comes first, then the caller's headers in order (a caller `Host`
/// is dropped), then `Content-Length` when there is a body and the caller
/// did not frame it.
pub(crate) fn encode_request(request: &Request) -> Result<Vec<u8>> {
    request.validate_headers()?;
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.path_and_query().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    out.extend_from_slice(request.authority().as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in request.headers() {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if let Some(body) = request.body_bytes() {
        let framed = request.header_value("content-length").is_some()
            || request.header_value("transfer-encoding").is_some();
        if !framed {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

fn find_header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Hex chunk size; chunk extensions after `;` are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line).map_err(|_| Error::protocol("non-ASCII chunk size"))?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| Error::protocol(format!("invalid chunk size {:?}", text)))
}

/// Repeated values must agree.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parsed = None;
    for part in value.split(',') {
        let len = part
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::protocol(format!("invalid Content-Length: {}", value)))?;
        match parsed {
            Some(previous) if previous != len => {
                return Err(Error::protocol(format!(
                    "conflicting Content-Length values: {}",
                    value
                )))
            }
            _ => parsed = Some(len),
        }
    }
    parsed.ok_or_else(|| Error::protocol("empty Content-Length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn exchange(request: Request, reply: &'static [u8]) -> (Result<Response>, Vec<u8>) {
        let (client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let mut seen = vec![0u8; 4096];
            let n = server.read(&mut seen).await.unwrap();
            seen.truncate(n);
            server.write_all(reply).await.unwrap();
            seen
        });
        let mut conn = H1Connection::new(client);
        let result = conn.send_request(&request).await;
        drop(conn.into_inner());
        (result, server_task.await.unwrap())
    }

    #[test]
    fn test_request_head_order() {
        let req = Request::get("https://example.com:8443/a?b=c")
            .unwrap()
            .header("User-Agent", "x")
            .header("host", "ignored")
            .header("Accept", "*/*");
        let head = String::from_utf8(encode_request(&req).unwrap()).unwrap();
        assert_eq!(
            head,
            "GET /a?b=c HTTP/1.1\r\nHost: example.com:8443\r\nUser-Agent: x\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn test_content_length_added_once() {
        let req = Request::new(Method::POST, "https://example.com/").unwrap().body("abc");
        let head = String::from_utf8(encode_request(&req).unwrap()).unwrap();
        assert!(head.contains("Content-Length: 3\r\n"));

        let req = Request::new(Method::POST, "https://example.com/")
            .unwrap()
            .header("content-length", "3")
            .body("abc");
        let head = String::from_utf8(encode_request(&req).unwrap()).unwrap();
        assert_eq!(head.matches("ength: 3").count(), 1);
    }

    #[test]
    fn test_injection_rejected() {
        let req = Request::get("https://example.com/").unwrap().header("X", "a\r\nB: c");
        assert!(matches!(encode_request(&req), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_chunk_size(b"1f").unwrap(), 31);
        assert_eq!(parse_chunk_size(b"A;name=value").unwrap(), 10);
        assert!(parse_chunk_size(b"xyz").is_err());
        assert_eq!(parse_content_length("100, 100").unwrap(), 100);
        assert!(parse_content_length("100, 200").is_err());
        assert!(parse_content_length("-1").is_err());
        assert_eq!(find_crlf(b"ab\r\n"), Some(2));
        assert_eq!(find_crlf(b"\r"), None);
    }

    #[tokio::test]
    async fn test_content_length_response() {
        let req = Request::get("https://example.com/").unwrap();
        let (resp, seen) = exchange(req, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-A: 1\r\n\r\nhello").await;
        let resp = resp.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body().as_ref(), b"hello");
        assert_eq!(resp.get_header("x-a"), Some("1"));
        assert!(seen.starts_with(b"GET / HTTP/1.1\r\nHost: example.com\r\n"));
    }

    #[tokio::test]
    async fn test_chunked_with_trailers_after_continue() {
        let req = Request::get("https://example.com/").unwrap();
        let reply: &'static [u8] = b"HTTP/1.1 100 Continue\r\n\r\n\
            HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: t\r\n\r\n";
        let resp = exchange(req, reply).await.0.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_protocol_error() {
        let req = Request::get("https://example.com/").unwrap();
        let reply: &'static [u8] =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n";
        let result = exchange(req, reply).await.0;
        assert!(matches!(result, Err(Error::Protocol(_))), "{:?}", result);

        let req = Request::get("https://example.com/").unwrap();
        let reply: &'static [u8] =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10000001\r\nabc\r\n";
        let result = exchange(req, reply).await.0;
        assert!(matches!(result, Err(Error::Protocol(_))), "{:?}", result);
    }

    #[tokio::test]
    async fn test_close_delimited_and_head() {
        let req = Request::get("https://example.com/").unwrap();
        let resp = exchange(req, b"HTTP/1.1 200 OK\r\n\r\nuntil close").await.0.unwrap();
        assert_eq!(resp.body().as_ref(), b"until close");

        let req = Request::new(Method::HEAD, "https://example.com/").unwrap();
        let resp = exchange(req, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n").await.0.unwrap();
        assert!(resp.body().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_is_protocol_error() {
        let req = Request::get("https://example.com/").unwrap();
        let result = exchange(req, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").await.0;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_garbage_head_is_protocol_error() {
        let req = Request::get("https://example.com/").unwrap();
        let result = exchange(req, b"SSH-2.0-OpenSSH\r\n\r\n").await.0;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
