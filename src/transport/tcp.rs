//! TCP dialing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Connect to `host:port`, trying each resolved address in order.
///
/// Resolution, refusal and the connect deadline all surface as
/// [`Error::DialFailed`]. The deadline covers resolution and every attempt.
pub async fn dial(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addr = format!("{}:{}", host.trim_start_matches('[').trim_end_matches(']'), port);
    let attempt = connect_any(&addr);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| Error::dial(&addr, format!("connect timed out after {:?}", limit)))??,
        None => attempt.await?,
    };
    stream
        .set_nodelay(true)
        .map_err(|e| Error::dial(&addr, e))?;
    Ok(stream)
}

async fn connect_any(addr: &str) -> Result<TcpStream> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| Error::dial(addr, format!("DNS resolution failed: {}", e)))?
        .collect();
    if resolved.is_empty() {
        return Err(Error::dial(addr, "no addresses found"));
    }

    let mut last_error = None;
    for candidate in resolved {
        match TcpStream::connect(candidate).await {
            Ok(stream) => {
                tracing::trace!(%candidate, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%candidate, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(Error::dial(
        addr,
        last_error.map_or_else(|| "connect failed".to_string(), |e| e.to_string()),
    ))
}
