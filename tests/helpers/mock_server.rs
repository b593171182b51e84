use std::sync::{Arc, Mutex};

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// TLS server answering every HTTP/1.1 request with a canned response.
pub struct MockServer {
    listener: TcpListener,
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            requests: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://127.0.0.1:{}{}", self.port, path)
    }

    /// Requests seen so far: head plus the Content-Length body.
    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.requests)
    }

    pub fn start(self, acceptor: SslAcceptor, response: Vec<u8>) -> tokio::task::JoinHandle<()> {
        let acceptor = Arc::new(acceptor);
        let response = Arc::new(response);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = self.listener.accept().await {
                let acceptor = Arc::clone(&acceptor);
                let response = Arc::clone(&response);
                let requests = Arc::clone(&self.requests);
                tokio::spawn(async move {
                    let Ok(mut tls) = tokio_boring::accept(&acceptor, tcp).await else {
                        return;
                    };
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    // head, then as much body as Content-Length announces
                    let mut wanted = None;
                    loop {
                        if wanted.is_none() {
                            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                                wanted = Some(end + 4 + content_length(&buf[..end]));
                            }
                        }
                        if wanted.is_some_and(|total| buf.len() >= total) {
                            break;
                        }
                        match tls.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    requests
                        .lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&buf).into_owned());
                    let _ = tls.write_all(&response).await;
                    let _ = tls.shutdown().await;
                });
            }
        })
    }
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Serialize a minimal HTTP/1.1 response with Content-Length framing.
pub fn http1_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}
