//! # Veneer
//!
//! HTTPS client whose TLS ClientHello follows a named browser fingerprint
//! (a [`HelloId`]) byte for byte, then speaks HTTP/1.1 or HTTP/2 depending
//! on what the server selects through ALPN.
//!
//! ```rust,ignore
//! use veneer::{Client, HelloId};
//!
//! let client = Client::new(HelloId::CHROME_72)?;
//! let response = client.get("https://www.gstatic.com/firebasejs/4.9.1/firebase.js").send().await?;
//! println!("{} over {}", response.status, response.http_version().as_str());
//! ```

pub mod client;
pub mod error;
pub mod fingerprint;
pub mod request;
pub mod response;
pub mod timeouts;
pub mod transport;
pub mod version;

// Re-exports
pub use client::{fetch, Client, ClientBuilder, RequestBuilder};
pub use error::{Error, ErrorLayer, Result};
pub use fingerprint::{ClientHelloSpec, HelloId, Http2Settings};
pub use request::Request;
pub use response::Response;
pub use timeouts::Timeouts;
pub use transport::{Exchange, NegotiatedSession, TlsConnector, TlsStream};
pub use version::{HttpVersion, TlsVersion};
