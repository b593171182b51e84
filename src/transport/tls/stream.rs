//! Encrypted byte stream over an established TLS session.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::codec::Reader;
use super::handshake::MAX_HANDSHAKE_MESSAGE;
use super::record::{alert_name, content_type, take_record, RecordCipher, RecordLayer, MAX_FRAGMENT};
use super::schedule::{next_traffic_secret, traffic_keys, SuiteParams};
use crate::error::{Error, Result};

const NEW_SESSION_TICKET: u8 = 4;
const HELLO_REQUEST: u8 = 0;
const KEY_UPDATE: u8 = 24;

/// TLS 1.3 application traffic secrets, kept for KeyUpdate.
pub(crate) struct TrafficSecrets {
    pub suite: SuiteParams,
    pub client: Vec<u8>,
    pub server: Vec<u8>,
}

/// A TLS connection after the handshake.
///
/// Reads and writes application data. Session tickets are dropped, TLS 1.3
/// KeyUpdate is honoured, `close_notify` reads as end of stream and
/// `shutdown` sends one. Dropping the stream drops (closes) the transport.
pub struct TlsStream<S> {
    io: S,
    rbuf: BytesMut,
    plain: BytesMut,
    pending_handshake: Vec<u8>,
    reader: RecordCipher,
    writer: RecordCipher,
    wbuf: BytesMut,
    /// Largest plaintext per outgoing record.
    max_fragment: usize,
    secrets: Option<TrafficSecrets>,
    read_closed: bool,
    close_sent: bool,
}

impl<S> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("buffered_plaintext", &self.plain.len())
            .field("read_closed", &self.read_closed)
            .field("close_sent", &self.close_sent)
            .finish()
    }
}

impl<S> TlsStream<S> {
    pub(crate) fn new(layer: RecordLayer<S>, secrets: Option<TrafficSecrets>) -> Result<Self> {
        let RecordLayer {
            io,
            rbuf,
            reader,
            writer,
            ..
        } = layer;
        let (reader, writer) = reader
            .zip(writer)
            .ok_or_else(|| Error::handshake("record protection not established"))?;
        Ok(Self {
            io,
            rbuf,
            plain: BytesMut::new(),
            pending_handshake: Vec::new(),
            reader,
            writer,
            wbuf: BytesMut::new(),
            max_fragment: MAX_FRAGMENT,
            secrets,
            read_closed: false,
            close_sent: false,
        })
    }

    /// Cap outgoing records at the peer's record_size_limit.
    pub(crate) fn with_record_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            tracing::debug!(limit, "peer limits record size");
            self.max_fragment = limit.clamp(1, MAX_FRAGMENT);
        }
        self
    }

    /// Largest plaintext sent in one record.
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment
    }

    /// The underlying transport.
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Process one decrypted record.
    fn on_record(&mut self, typ: u8, payload: BytesMut) -> Result<()> {
        match typ {
            content_type::APPLICATION_DATA => {
                self.plain.extend_from_slice(&payload);
                Ok(())
            }
            content_type::ALERT => {
                let mut r = Reader::new(&payload);
                let level = r.u8()?;
                let description = r.u8()?;
                if description == 0 {
                    tracing::debug!("peer sent close_notify");
                    self.read_closed = true;
                    Ok(())
                } else if level == 1 && self.secrets.is_none() {
                    tracing::debug!(alert = alert_name(description), "ignoring warning alert");
                    Ok(())
                } else {
                    Err(Error::transport(
                        io::ErrorKind::ConnectionAborted,
                        format!("peer sent alert {}", alert_name(description)),
                    ))
                }
            }
            content_type::HANDSHAKE => {
                self.pending_handshake.extend_from_slice(&payload);
                self.on_handshake_messages()
            }
            // late middlebox-compat CCS
            content_type::CHANGE_CIPHER_SPEC => Ok(()),
            other => Err(Error::handshake(format!("unexpected record type {}", other))),
        }
    }

    fn on_handshake_messages(&mut self) -> Result<()> {
        loop {
            if self.pending_handshake.len() < 4 {
                return Ok(());
            }
            let len = ((self.pending_handshake[1] as usize) << 16)
                | ((self.pending_handshake[2] as usize) << 8)
                | self.pending_handshake[3] as usize;
            if len > MAX_HANDSHAKE_MESSAGE {
                return Err(Error::handshake(format!(
                    "post-handshake message too large: {}",
                    len
                )));
            }
            if self.pending_handshake.len() < 4 + len {
                return Ok(());
            }
            let msg: Vec<u8> = self.pending_handshake.drain(..4 + len).collect();
            match msg[0] {
                NEW_SESSION_TICKET => tracing::trace!("ignoring session ticket"),
                HELLO_REQUEST if self.secrets.is_none() => {
                    tracing::debug!("ignoring renegotiation request")
                }
                KEY_UPDATE if self.secrets.is_some() => self.key_update(&msg[4..])?,
                other => {
                    return Err(Error::handshake(format!(
                        "unexpected post-handshake message {}",
                        other
                    )))
                }
            }
        }
    }

    fn key_update(&mut self, body: &[u8]) -> Result<()> {
        let request_update = match body {
            [0] => false,
            [1] => true,
            _ => return Err(Error::handshake("malformed KeyUpdate")),
        };
        let secrets = self
            .secrets
            .as_mut()
            .ok_or_else(|| Error::handshake("KeyUpdate outside TLS 1.3"))?;

        secrets.server = next_traffic_secret(&secrets.suite, &secrets.server)?;
        let (key, iv) = traffic_keys(&secrets.suite, &secrets.server)?;
        self.reader = RecordCipher::tls13(&secrets.suite, &key, &iv)?;
        tracing::debug!(request_update, "peer updated its traffic keys");

        if request_update {
            // sent under the old key, then switch
            let record = self.writer.seal(content_type::HANDSHAKE, &[KEY_UPDATE, 0, 0, 1, 0])?;
            self.wbuf.extend_from_slice(&record);
            secrets.client = next_traffic_secret(&secrets.suite, &secrets.client)?;
            let (key, iv) = traffic_keys(&secrets.suite, &secrets.client)?;
            self.writer = RecordCipher::tls13(&secrets.suite, &key, &iv)?;
        }
        Ok(())
    }
}

impl<S> TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.wbuf.is_empty() {
            let n = ready!(Pin::new(&mut self.io).poll_write(cx, &self.wbuf))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.wbuf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.plain.is_empty() {
                let n = this.plain.len().min(buf.remaining());
                buf.put_slice(&this.plain[..n]);
                this.plain.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.read_closed {
                return Poll::Ready(Ok(()));
            }

            match take_record(&mut this.rbuf).map_err(Error::into_io)? {
                Some((typ, header, payload)) => {
                    let (typ, plain) = if typ == content_type::CHANGE_CIPHER_SPEC {
                        (typ, payload)
                    } else {
                        this.reader.open(header, payload).map_err(Error::into_io)?
                    };
                    this.on_record(typ, plain).map_err(Error::into_io)?;
                    if !this.wbuf.is_empty() {
                        // KeyUpdate response; finished by the next write or flush if pending
                        let _ = this.poll_drain(cx)?;
                    }
                }
                None => {
                    let mut chunk = [0u8; 8192];
                    let mut chunk_buf = ReadBuf::new(&mut chunk);
                    ready!(Pin::new(&mut this.io).poll_read(cx, &mut chunk_buf))?;
                    let filled = chunk_buf.filled();
                    if filled.is_empty() {
                        if this.rbuf.is_empty() {
                            tracing::debug!("transport closed without close_notify");
                            this.read_closed = true;
                            return Poll::Ready(Ok(()));
                        }
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-record",
                        )));
                    }
                    this.rbuf.extend_from_slice(filled);
                }
            }
        }
    }
}

impl<S> AsyncWrite for TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.close_sent {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after close_notify",
            )));
        }
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let n = buf.len().min(this.max_fragment);
        let record = this
            .writer
            .seal(content_type::APPLICATION_DATA, &buf[..n])
            .map_err(Error::into_io)?;
        this.wbuf.extend_from_slice(&record);
        // The record is committed; a pending drain completes on flush.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.close_sent {
            let record = this
                .writer
                .seal(content_type::ALERT, &[1, 0])
                .map_err(Error::into_io)?;
            this.wbuf.extend_from_slice(&record);
            this.close_sent = true;
            tracing::debug!("sending close_notify");
        }
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.io).poll_shutdown(cx)
    }
}
