//! Certificate decompression (RFC 8879) for zlib and brotli.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::fingerprint::tls::cert_compression;

/// Uncompressed certificate messages are capped at the handshake message limit.
const MAX_UNCOMPRESSED: usize = 1 << 24;

/// Inflate a CompressedCertificate payload into a Certificate message body.
///
/// The output must be exactly `uncompressed_len` bytes.
pub(crate) fn decompress_certificate(algorithm: u16, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    if uncompressed_len == 0 || uncompressed_len > MAX_UNCOMPRESSED {
        return Err(Error::handshake(format!(
            "bad uncompressed certificate length {}",
            uncompressed_len
        )));
    }

    let mut decompressed = Vec::with_capacity(uncompressed_len);
    // One byte over the limit is enough to detect a lying length.
    let limit = uncompressed_len as u64 + 1;
    let read = match algorithm {
        cert_compression::BROTLI => {
            brotli::Decompressor::new(data, 4096)
                .take(limit)
                .read_to_end(&mut decompressed)
        }
        cert_compression::ZLIB => ZlibDecoder::new(data).take(limit).read_to_end(&mut decompressed),
        other => {
            return Err(Error::handshake(format!(
                "unsupported certificate compression {:#06x}",
                other
            )))
        }
    };

    match read {
        Ok(_) if decompressed.len() == uncompressed_len => Ok(decompressed),
        Ok(_) => Err(Error::handshake(format!(
            "certificate decompressed to {} bytes, expected {}",
            decompressed.len(),
            uncompressed_len
        ))),
        Err(e) => Err(Error::handshake(format!("certificate decompression failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Vec<u8> {
        (0..2000u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_zlib() {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&sample()).unwrap();
        let compressed = enc.finish().unwrap();
        let out = decompress_certificate(cert_compression::ZLIB, &compressed, 2000).unwrap();
        assert_eq!(out, sample());
    }

    #[test]
    fn test_brotli() {
        let mut compressed = Vec::new();
        {
            let mut enc = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            enc.write_all(&sample()).unwrap();
        }
        let out = decompress_certificate(cert_compression::BROTLI, &compressed, 2000).unwrap();
        assert_eq!(out, sample());
    }

    #[test]
    fn test_length_mismatch() {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&sample()).unwrap();
        let compressed = enc.finish().unwrap();
        assert!(decompress_certificate(cert_compression::ZLIB, &compressed, 1999).is_err());
        assert!(decompress_certificate(cert_compression::ZLIB, &compressed, 2001).is_err());
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(decompress_certificate(cert_compression::ZSTD, b"x", 10).is_err());
    }
}
