//! TLS record framing and AEAD record protection.

use bytes::{Buf, BytesMut};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::schedule::{NonceStyle, SuiteParams};
use crate::error::{Error, Result};

pub(crate) mod content_type {
    pub const CHANGE_CIPHER_SPEC: u8 = 20;
    pub const ALERT: u8 = 21;
    pub const HANDSHAKE: u8 = 22;
    pub const APPLICATION_DATA: u8 = 23;
}

/// Largest plaintext fragment.
pub(crate) const MAX_FRAGMENT: usize = 16384;
/// Largest ciphertext a peer may send (TLS 1.2 allows +2048).
const MAX_CIPHERTEXT: usize = MAX_FRAGMENT + 2048;
const HEADER_LEN: usize = 5;

/// Split one complete record off the front of `buf`, if there is one.
///
/// Returns `(content_type, header, payload)`.
pub(crate) fn take_record(buf: &mut BytesMut) -> Result<Option<(u8, [u8; 5], BytesMut)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    if len > MAX_CIPHERTEXT {
        return Err(Error::handshake(format!("record overflow: {} bytes", len)));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len);
    Ok(Some((header[0], header, payload)))
}

/// Human-readable alert description for logs and errors.
pub(crate) fn alert_name(description: u8) -> &'static str {
    match description {
        0 => "close_notify",
        10 => "unexpected_message",
        20 => "bad_record_mac",
        22 => "record_overflow",
        40 => "handshake_failure",
        42 => "bad_certificate",
        43 => "unsupported_certificate",
        44 => "certificate_revoked",
        45 => "certificate_expired",
        46 => "certificate_unknown",
        47 => "illegal_parameter",
        48 => "unknown_ca",
        50 => "decode_error",
        51 => "decrypt_error",
        70 => "protocol_version",
        71 => "insufficient_security",
        80 => "internal_error",
        86 => "inappropriate_fallback",
        90 => "user_canceled",
        109 => "missing_extension",
        110 => "unsupported_extension",
        112 => "unrecognized_name",
        116 => "certificate_required",
        120 => "no_application_protocol",
        _ => "unknown_alert",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Tls13,
    Tls12(NonceStyle),
}

/// One direction of record protection with its sequence number.
pub(crate) struct RecordCipher {
    key: LessSafeKey,
    iv: Vec<u8>,
    seq: u64,
    protection: Protection,
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("seq", &self.seq)
            .field("protection", &self.protection)
            .finish()
    }
}

impl RecordCipher {
    fn new(alg: &'static aead::Algorithm, key: &[u8], iv: &[u8], protection: Protection) -> Result<Self> {
        let key = UnboundKey::new(alg, key).map_err(|_| Error::handshake("bad traffic key length"))?;
        Ok(Self {
            key: LessSafeKey::new(key),
            iv: iv.to_vec(),
            seq: 0,
            protection,
        })
    }

    pub(crate) fn tls13(suite: &SuiteParams, key: &[u8], iv: &[u8]) -> Result<Self> {
        Self::new(suite.aead, key, iv, Protection::Tls13)
    }

    pub(crate) fn tls12(suite: &SuiteParams, key: &[u8], iv: &[u8]) -> Result<Self> {
        Self::new(suite.aead, key, iv, Protection::Tls12(suite.nonce))
    }

    fn next_seq(&mut self) -> Result<u64> {
        let seq = self.seq;
        self.seq = seq
            .checked_add(1)
            .ok_or_else(|| Error::handshake("record sequence number exhausted"))?;
        Ok(seq)
    }

    fn xor_nonce(&self, seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.iv[..12]);
        for (n, s) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
            *n ^= s;
        }
        nonce
    }

    fn tls12_aad(seq: u64, typ: u8, len: usize) -> [u8; 13] {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&seq.to_be_bytes());
        aad[8] = typ;
        aad[9..11].copy_from_slice(&[3, 3]);
        aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
        aad
    }

    /// Protect one fragment and return the complete record.
    pub(crate) fn seal(&mut self, typ: u8, fragment: &[u8]) -> Result<Vec<u8>> {
        let seq = self.next_seq()?;
        let tag_len = self.key.algorithm().tag_len();
        match self.protection {
            Protection::Tls13 => {
                let mut body = Vec::with_capacity(fragment.len() + 1 + tag_len);
                body.extend_from_slice(fragment);
                body.push(typ);
                let len = body.len() + tag_len;
                let header = [content_type::APPLICATION_DATA, 3, 3, (len >> 8) as u8, len as u8];
                self.key
                    .seal_in_place_append_tag(
                        Nonce::assume_unique_for_key(self.xor_nonce(seq)),
                        Aad::from(header),
                        &mut body,
                    )
                    .map_err(|_| Error::handshake("record encryption failed"))?;
                let mut record = header.to_vec();
                record.extend_from_slice(&body);
                Ok(record)
            }
            Protection::Tls12(style) => {
                let aad = Self::tls12_aad(seq, typ, fragment.len());
                let (nonce, explicit) = match style {
                    NonceStyle::ExplicitGcm => {
                        let mut nonce = [0u8; 12];
                        nonce[..4].copy_from_slice(&self.iv[..4]);
                        nonce[4..].copy_from_slice(&seq.to_be_bytes());
                        (nonce, Some(seq.to_be_bytes()))
                    }
                    NonceStyle::XorSequence => (self.xor_nonce(seq), None),
                };
                let mut body = fragment.to_vec();
                self.key
                    .seal_in_place_append_tag(
                        Nonce::assume_unique_for_key(nonce),
                        Aad::from(aad),
                        &mut body,
                    )
                    .map_err(|_| Error::handshake("record encryption failed"))?;
                let len = body.len() + explicit.map_or(0, |e| e.len());
                let mut record = vec![typ, 3, 3, (len >> 8) as u8, len as u8];
                if let Some(explicit) = explicit {
                    record.extend_from_slice(&explicit);
                }
                record.extend_from_slice(&body);
                Ok(record)
            }
        }
    }

    /// Remove protection from one record. Returns the real content type
    /// and the plaintext.
    pub(crate) fn open(&mut self, header: [u8; 5], mut payload: BytesMut) -> Result<(u8, BytesMut)> {
        let seq = self.next_seq()?;
        let tag_len = self.key.algorithm().tag_len();
        match self.protection {
            Protection::Tls13 => {
                if header[0] != content_type::APPLICATION_DATA {
                    return Err(Error::handshake("unexpected plaintext record after key change"));
                }
                let len = self
                    .key
                    .open_in_place(
                        Nonce::assume_unique_for_key(self.xor_nonce(seq)),
                        Aad::from(header),
                        &mut payload,
                    )
                    .map_err(|_| Error::handshake("bad_record_mac"))?
                    .len();
                payload.truncate(len);
                // TLSInnerPlaintext: content, type, zero padding
                while payload.last() == Some(&0) {
                    payload.truncate(payload.len() - 1);
                }
                let typ = payload
                    .last()
                    .copied()
                    .ok_or_else(|| Error::handshake("record with no content type"))?;
                payload.truncate(payload.len() - 1);
                Ok((typ, payload))
            }
            Protection::Tls12(style) => {
                let typ = header[0];
                let nonce = match style {
                    NonceStyle::ExplicitGcm => {
                        if payload.len() < 8 + tag_len {
                            return Err(Error::handshake("short encrypted record"));
                        }
                        let mut nonce = [0u8; 12];
                        nonce[..4].copy_from_slice(&self.iv[..4]);
                        nonce[4..].copy_from_slice(&payload[..8]);
                        payload.advance(8);
                        nonce
                    }
                    NonceStyle::XorSequence => {
                        if payload.len() < tag_len {
                            return Err(Error::handshake("short encrypted record"));
                        }
                        self.xor_nonce(seq)
                    }
                };
                let aad = Self::tls12_aad(seq, typ, payload.len() - tag_len);
                let len = self
                    .key
                    .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut payload)
                    .map_err(|_| Error::handshake("bad_record_mac"))?
                    .len();
                payload.truncate(len);
                Ok((typ, payload))
            }
        }
    }
}

/// Record reader/writer used while the handshake runs.
///
/// After the handshake the same pieces are handed to the stream wrapper.
pub(crate) struct RecordLayer<S> {
    pub(crate) io: S,
    pub(crate) rbuf: BytesMut,
    pub(crate) reader: Option<RecordCipher>,
    pub(crate) writer: Option<RecordCipher>,
    /// Version written in the header of plaintext records.
    pub(crate) plain_version: u16,
}

impl<S> RecordLayer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: S, plain_version: u16) -> Self {
        Self {
            io,
            rbuf: BytesMut::with_capacity(MAX_CIPHERTEXT + HEADER_LEN),
            reader: None,
            writer: None,
            plain_version,
        }
    }

    /// Read and unprotect the next record.
    pub(crate) async fn read_record(&mut self) -> Result<(u8, BytesMut)> {
        loop {
            if let Some((typ, header, payload)) = take_record(&mut self.rbuf)? {
                tracing::trace!(content_type = typ, len = payload.len(), "record in");
                // A plaintext CCS may arrive after keys changed (TLS 1.3 compat).
                if typ == content_type::CHANGE_CIPHER_SPEC {
                    return Ok((typ, payload));
                }
                return match self.reader.as_mut() {
                    Some(cipher) => cipher.open(header, payload),
                    None => Ok((typ, payload)),
                };
            }
            let n = self.io.read_buf(&mut self.rbuf).await?;
            if n == 0 {
                return Err(Error::handshake("connection closed during handshake"));
            }
        }
    }

    /// Fragment, protect and send `data` as records of type `typ`.
    pub(crate) async fn write_record(&mut self, typ: u8, data: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(data.len() + 64);
        for fragment in data.chunks(MAX_FRAGMENT) {
            match self.writer.as_mut() {
                Some(cipher) => out.extend_from_slice(&cipher.seal(typ, fragment)?),
                None => {
                    out.push(typ);
                    out.extend_from_slice(&self.plain_version.to_be_bytes());
                    out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
                    out.extend_from_slice(fragment);
                }
            }
        }
        tracing::trace!(content_type = typ, len = data.len(), "record out");
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Plaintext ChangeCipherSpec, regardless of current protection.
    pub(crate) async fn write_change_cipher_spec(&mut self) -> Result<()> {
        let record = [content_type::CHANGE_CIPHER_SPEC, 3, 3, 0, 1, 1];
        self.io.write_all(&record).await?;
        self.io.flush().await?;
        Ok(())
    }
}
