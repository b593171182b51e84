//! Outgoing request description.

use bytes::Bytes;
use http::Method;
use url::{Host, Url};

use crate::error::{Error, Result};

/// One HTTP request: method, `https` URL, ordered headers and optional body.
///
/// Headers are sent in insertion order on HTTP/1.1; `Host` is always
/// written first and derived from the URL.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl Request {
    /// Parse `url` and check it can be fetched (https with a host).
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::invalid_request(format!("{}: {}", url, e)))?;
        if url.scheme() != "https" {
            return Err(Error::invalid_request(format!(
                "unsupported scheme {:?}, only https is supported",
                url.scheme()
            )));
        }
        if url.host().is_none() {
            return Err(Error::invalid_request(format!("{} has no host", url)));
        }
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Append a header; repeated names are kept.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Host to dial and verify, without IPv6 brackets.
    pub fn host(&self) -> String {
        match self.url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(443)
    }

    /// `host[:port]` as used for `Host` and `:authority`; the port is
    /// omitted when it is the default.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Origin-form request target.
    pub fn path_and_query(&self) -> String {
        let mut target = self.url.path().to_string();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    /// First value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Reject header names that are not tokens and values with CR, LF or NUL.
    pub(crate) fn validate_headers(&self) -> Result<()> {
        for (name, value) in &self.headers {
            if name.is_empty() || !name.bytes().all(is_tchar) {
                return Err(Error::invalid_request(format!("invalid header name {:?}", name)));
            }
            if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
                return Err(Error::invalid_request(format!(
                    "invalid value for header {}",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}
