//! HTTP response with explicit decompression.

use std::collections::BTreeSet;
use std::io::Read;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::version::HttpVersion;

/// Headers that only describe one hop and cannot appear in HTTP/2.
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// HTTP response: status, ordered headers, raw body and the HTTP version
/// it was received over.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    body: Bytes,
    http_version: HttpVersion,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes, http_version: HttpVersion) -> Self {
        Self { status, headers, body, http_version }
    }

    pub fn http_version(&self) -> HttpVersion { self.http_version }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn into_body(self) -> Bytes { self.body }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Headers as an order-insensitive set of `(lowercase name, value)`,
    /// without connection-specific headers.
    ///
    /// Two responses for the same resource compare equal here whether they
    /// came over HTTP/1.1 or HTTP/2.
    pub fn header_set(&self) -> BTreeSet<(String, String)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .filter(|(name, _)| !CONNECTION_SPECIFIC.contains(&name.as_str()))
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> { self.get_header("Content-Type") }
    pub fn content_encoding(&self) -> Option<&str> { self.get_header("Content-Encoding") }

    /// Decode body based on Content-Encoding (gzip, deflate, br).
    pub fn decoded_body(&self) -> Result<Bytes> {
        match self.content_encoding().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => decode_gzip(&self.body),
            Some("deflate") => decode_deflate(&self.body),
            Some("br") => decode_brotli(&self.body),
            Some("identity") | None => {
                // gzip magic without a Content-Encoding header
                if self.body.starts_with(&[0x1f, 0x8b]) {
                    return decode_gzip(&self.body);
                }
                Ok(self.body.clone())
            }
            Some(other) => Err(Error::Decompression(format!("unsupported content encoding {:?}", other))),
        }
    }

    pub fn text(&self) -> Result<String> {
        let decoded = self.decoded_body()?;
        String::from_utf8(decoded.to_vec())
            .map_err(|e| Error::Decompression(format!("UTF-8 decode error: {}", e)))
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    // zlib-wrapped per RFC 9110, raw deflate from servers that get it wrong
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data).read_to_end(&mut decoded).is_ok() {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data).read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn response(headers: &[(&str, &str)], body: Vec<u8>) -> Response {
        let headers = headers.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect();
        Response::new(200, headers, Bytes::from(body), HttpVersion::Http1_1)
    }

    #[test]
    fn test_header_lookup() {
        let resp = response(&[("Content-Type", "text/plain"), ("Set-Cookie", "a=1"), ("set-cookie", "b=2")], vec![]);
        assert_eq!(resp.get_header("content-type"), Some("text/plain"));
        assert_eq!(resp.get_headers("SET-COOKIE"), vec!["a=1", "b=2"]);
        assert_eq!(resp.get_header("missing"), None);
    }

    #[test]
    fn test_header_set_ignores_order_case_and_hop_headers() {
        let h1 = response(&[("Content-Length", "5"), ("Connection", "keep-alive"), ("ETag", "\"x\"")], vec![]);
        let h2 = response(&[("etag", "\"x\""), ("content-length", "5")], vec![]);
        assert_eq!(h1.header_set(), h2.header_set());
    }

    #[test]
    fn test_gzip_body() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"hello gzip").unwrap();
        let body = enc.finish().unwrap();
        assert_eq!(response(&[("Content-Encoding", "gzip")], body.clone()).text().unwrap(), "hello gzip");
        // sniffed without the header
        assert_eq!(response(&[], body).text().unwrap(), "hello gzip");
    }

    #[test]
    fn test_deflate_both_framings() {
        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(b"wrapped").unwrap();
        assert_eq!(response(&[("Content-Encoding", "deflate")], zlib.finish().unwrap()).text().unwrap(), "wrapped");

        let mut raw = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(b"raw").unwrap();
        assert_eq!(response(&[("Content-Encoding", "deflate")], raw.finish().unwrap()).text().unwrap(), "raw");
    }

    #[test]
    fn test_brotli_body() {
        let mut body = Vec::new();
        {
            let mut enc = brotli::CompressorWriter::new(&mut body, 4096, 5, 22);
            enc.write_all(b"hello br").unwrap();
        }
        assert_eq!(response(&[("Content-Encoding", "br")], body).text().unwrap(), "hello br");
    }

    #[test]
    fn test_unknown_encoding_and_bad_utf8() {
        assert!(matches!(
            response(&[("Content-Encoding", "zstd")], b"x".to_vec()).decoded_body(),
            Err(Error::Decompression(_))
        ));
        assert!(matches!(response(&[], vec![0xff, 0xfe]).text(), Err(Error::Decompression(_))));
    }
}
