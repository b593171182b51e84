//! Hand-rolled TLS client whose ClientHello follows a fingerprint profile.
//!
//! - `hello`: ClientHello encoding (GREASE, padding, SNI) and parsing
//! - `handshake`: TLS 1.3 / TLS 1.2 client state machine
//! - `record`, `stream`: record protection and the post-handshake stream
//! - `schedule`, `keys`: key derivation and ECDHE
//! - `verify`, `compress`: certificate handling

mod codec;
mod compress;
pub(crate) mod handshake;
pub(crate) mod hello;
mod keys;
mod record;
mod schedule;
mod stream;
pub(crate) mod verify;

pub use handshake::HandshakeState;
pub use hello::{encode_client_hello, GreaseValues, HelloParams, ParsedClientHello};
pub use stream::TlsStream;
