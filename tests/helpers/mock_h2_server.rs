use std::sync::Arc;

use boring::ssl::SslAcceptor;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// TLS server speaking scripted HTTP/2 frames.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
}

impl MockH2Server {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://127.0.0.1:{}{}", self.port, path)
    }

    /// Accept TLS connections and hand each one to `handler`.
    pub fn start<F, Fut>(self, acceptor: SslAcceptor, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(MockH2Connection<tokio_boring::SslStream<tokio::net::TcpStream>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = self.listener.accept().await {
                let handler = Arc::clone(&handler);
                let acceptor = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    if let Ok(tls) = tokio_boring::accept(&acceptor, tcp).await {
                        handler(MockH2Connection::new(tls)).await;
                    }
                });
            }
        })
    }
}

/// One HTTP/2 connection under frame-level control.
pub struct MockH2Connection<S> {
    stream: S,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MockH2Connection<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn read_preface(&mut self) -> std::io::Result<()> {
        let mut preface = [0u8; 24];
        self.stream.read_exact(&mut preface).await?;
        if preface != PREFACE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid HTTP/2 preface",
            ));
        }
        Ok(())
    }

    pub async fn read_frame(&mut self) -> std::io::Result<Frame> {
        let mut header = [0u8; 9];
        self.stream.read_exact(&mut header).await?;
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;
        let mut payload = vec![0u8; length];
        self.stream.read_exact(&mut payload).await?;
        Ok(Frame {
            frame_type: header[3],
            flags: header[4],
            stream_id,
            payload: Bytes::from(payload),
        })
    }

    pub async fn send_frame(
        &mut self,
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let mut frame = BytesMut::with_capacity(9 + payload.len());
        let len = payload.len() as u32;
        frame.put_u8((len >> 16) as u8);
        frame.put_u8((len >> 8) as u8);
        frame.put_u8(len as u8);
        frame.put_u8(frame_type);
        frame.put_u8(flags);
        frame.put_u32(stream_id & 0x7fff_ffff);
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await
    }

    pub async fn send_settings(&mut self, settings: &[(u16, u32)]) -> std::io::Result<()> {
        let mut payload = BytesMut::new();
        for (id, value) in settings {
            payload.put_u16(*id);
            payload.put_u32(*value);
        }
        self.send_frame(FRAME_SETTINGS, 0, 0, &payload).await
    }

    pub async fn send_settings_ack(&mut self) -> std::io::Result<()> {
        self.send_frame(FRAME_SETTINGS, FLAG_ACK, 0, &[]).await
    }

    pub async fn send_window_update(&mut self, stream_id: u32, increment: u32) -> std::io::Result<()> {
        self.send_frame(FRAME_WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
            .await
    }

    /// HEADERS with `:status` plus literal fields.
    pub async fn send_headers(
        &mut self,
        stream_id: u32,
        status: u16,
        headers: &[(&str, &str)],
        end_stream: bool,
    ) -> std::io::Result<()> {
        let block = encode_header_block(status, headers);
        let mut flags = FLAG_END_HEADERS;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        self.send_frame(FRAME_HEADERS, flags, stream_id, &block).await
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> std::io::Result<()> {
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        self.send_frame(FRAME_DATA, flags, stream_id, data).await
    }

    pub async fn send_rst_stream(&mut self, stream_id: u32, error_code: u32) -> std::io::Result<()> {
        self.send_frame(FRAME_RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
            .await
    }

    pub async fn send_goaway(&mut self, last_stream_id: u32, error_code: u32) -> std::io::Result<()> {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(last_stream_id);
        payload.put_u32(error_code);
        self.send_frame(FRAME_GOAWAY, 0, 0, &payload).await
    }

    /// Serve a single request: answer the first HEADERS frame with
    /// `status`, `headers` and `body`, then drain until the client leaves.
    pub async fn serve_one(&mut self, status: u16, headers: &[(&str, &str)], body: &[u8]) -> std::io::Result<()> {
        self.read_preface().await?;
        self.send_settings(&[]).await?;
        let mut answered = false;
        loop {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            };
            match frame.frame_type {
                FRAME_SETTINGS if frame.flags & FLAG_ACK == 0 => self.send_settings_ack().await?,
                FRAME_HEADERS if !answered => {
                    answered = true;
                    let id = frame.stream_id;
                    if body.is_empty() {
                        self.send_headers(id, status, headers, true).await?;
                    } else {
                        self.send_headers(id, status, headers, false).await?;
                        self.send_data(id, body, true).await?;
                    }
                }
                FRAME_GOAWAY => return Ok(()),
                _ => {}
            }
        }
    }
}

/// HPACK block: indexed `:status 200` when possible, otherwise literal
/// fields without indexing and without Huffman coding.
pub fn encode_header_block(status: u16, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut block = Vec::new();
    if status == 200 {
        block.push(0x88);
    } else {
        push_literal(&mut block, ":status", &status.to_string());
    }
    for (name, value) in headers {
        push_literal(&mut block, &name.to_ascii_lowercase(), value);
    }
    block
}

fn push_literal(block: &mut Vec<u8>, name: &str, value: &str) {
    block.push(0x00);
    push_string(block, name.as_bytes());
    push_string(block, value.as_bytes());
}

fn push_string(block: &mut Vec<u8>, s: &[u8]) {
    // 7-bit prefix integer
    let mut len = s.len();
    if len < 127 {
        block.push(len as u8);
    } else {
        block.push(127);
        len -= 127;
        while len >= 128 {
            block.push((len % 128 + 128) as u8);
            len /= 128;
        }
        block.push(len as u8);
    }
    block.extend_from_slice(s);
}
