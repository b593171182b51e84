//! Timeout configuration for connections and exchanges.
//!
//! # Timeout Types
//!
//! - **connect**: TCP dial only. Exceeding it is reported as `DialFailed`.
//! - **handshake**: Overall budget for dial + TLS handshake. Exceeding it is
//!   reported as `Timeout`.
//! - **exchange**: Request written to full response read, on either HTTP
//!   version. Exceeding it is reported as `Timeout`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use veneer::{Client, Timeouts};
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .timeouts(Timeouts::defaults().handshake(Duration::from_secs(5)))
//!     .build()?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeout configuration.
///
/// All timeouts are optional. When `None`, no timeout is applied for that phase.
/// None of them reset: each is a deadline for its whole phase.
#[derive(Clone, Debug, Default)]
pub struct Timeouts {
    /// Deadline for the TCP connect.
    ///
    /// Default: 15s for defaults()
    pub connect: Option<Duration>,

    /// Deadline for dial + TLS handshake together.
    ///
    /// Default: 30s for defaults()
    pub handshake: Option<Duration>,

    /// Deadline for one request/response round trip, body included.
    ///
    /// Default: 60s for defaults()
    pub exchange: Option<Duration>,
}

impl Timeouts {
    /// Create a new Timeouts with all timeouts set to None.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensible defaults.
    ///
    /// - connect: 15s
    /// - handshake: 30s
    /// - exchange: 60s
    pub fn defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(15)),
            handshake: Some(Duration::from_secs(30)),
            exchange: Some(Duration::from_secs(60)),
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set overall handshake timeout.
    pub fn handshake(mut self, timeout: Duration) -> Self {
        self.handshake = Some(timeout);
        self
    }

    /// Set exchange timeout.
    pub fn exchange(mut self, timeout: Duration) -> Self {
        self.exchange = Some(timeout);
        self
    }

    /// Disable connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect = None;
        self
    }

    /// Disable handshake timeout.
    pub fn no_handshake_timeout(mut self) -> Self {
        self.handshake = None;
        self
    }

    /// Disable exchange timeout.
    pub fn no_exchange_timeout(mut self) -> Self {
        self.exchange = None;
        self
    }
}

/// Run `fut` under an optional deadline, mapping expiry to `Error::Timeout`.
pub(crate) async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}
