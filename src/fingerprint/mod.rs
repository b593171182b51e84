//! ClientHello fingerprint catalogue and HTTP/2 settings.

pub mod http2;
pub mod profiles;
pub mod tls;

pub use http2::Http2Settings;
pub use profiles::{lookup, registered, HelloId};
pub use tls::{ClientHelloSpec, ExtensionSpec, GreaseSlot, GREASE};
