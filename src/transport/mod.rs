//! Connection establishment and HTTP exchanges.
//!
//! - `tcp` + `connector` + `tls`: dial and the fingerprinted handshake
//! - `dispatch`: ALPN-driven choice of `h1` or `h2` for the exchange

pub mod connector;
pub mod dispatch;
mod h1;
mod h2;
pub mod session;
pub mod tcp;
pub mod tls;

pub use connector::{AlpnProtocol, TlsConnector, TlsConnectorBuilder};
pub use dispatch::{exchange, exchange_with, Exchange};
pub use session::NegotiatedSession;
pub use tls::{HandshakeState, TlsStream};
