//! ClientHello wire templates (JA3-relevant fields in exact order).
//!
//! A [`ClientHelloSpec`] says what goes on the wire and in which order; the
//! handshake engine fills in the per-connection parts (random, session id,
//! GREASE values, key shares, SNI, padding length).

/// Placeholder for a GREASE value (RFC 8701).
///
/// Wherever it appears in a cipher, group or version list, the encoder
/// substitutes the connection's GREASE value for that list.
pub const GREASE: u16 = 0x0a0a;

/// Is `value` one of the sixteen reserved GREASE code points?
pub fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0xff)
}

/// TLS cipher suite identifiers.
pub mod cipher_suites {
    pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
    pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
    pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;

    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02b;
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02f;
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: u16 = 0xc02c;
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: u16 = 0xc030;
    pub const TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256: u16 = 0xcca9;
    pub const TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256: u16 = 0xcca8;

    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA: u16 = 0xc009;
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA: u16 = 0xc00a;
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: u16 = 0xc013;
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: u16 = 0xc014;
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256: u16 = 0xc023;
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384: u16 = 0xc024;
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256: u16 = 0xc027;
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384: u16 = 0xc028;
    pub const TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA: u16 = 0xc008;
    pub const TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0xc012;

    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: u16 = 0x0033;
    pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0039;

    pub const TLS_RSA_WITH_AES_128_GCM_SHA256: u16 = 0x009c;
    pub const TLS_RSA_WITH_AES_256_GCM_SHA384: u16 = 0x009d;
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: u16 = 0x002f;
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0035;
    pub const TLS_RSA_WITH_AES_128_CBC_SHA256: u16 = 0x003c;
    pub const TLS_RSA_WITH_AES_256_CBC_SHA256: u16 = 0x003d;
    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0x000a;
}

/// TLS extension type identifiers.
pub mod extensions {
    pub const SERVER_NAME: u16 = 0x0000;
    pub const STATUS_REQUEST: u16 = 0x0005;
    pub const SUPPORTED_GROUPS: u16 = 0x000a;
    pub const EC_POINT_FORMATS: u16 = 0x000b;
    pub const SIGNATURE_ALGORITHMS: u16 = 0x000d;
    pub const ALPN: u16 = 0x0010;
    pub const SIGNED_CERTIFICATE_TIMESTAMP: u16 = 0x0012;
    pub const PADDING: u16 = 0x0015;
    pub const EXTENDED_MASTER_SECRET: u16 = 0x0017;
    pub const COMPRESS_CERTIFICATE: u16 = 0x001b;
    pub const RECORD_SIZE_LIMIT: u16 = 0x001c;
    pub const SESSION_TICKET: u16 = 0x0023;
    pub const PRE_SHARED_KEY: u16 = 0x0029;
    pub const SUPPORTED_VERSIONS: u16 = 0x002b;
    pub const COOKIE: u16 = 0x002c;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
    pub const KEY_SHARE: u16 = 0x0033;
    pub const RENEGOTIATION_INFO: u16 = 0xff01;
}

/// Named groups.
pub mod groups {
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
    pub const SECP521R1: u16 = 0x0019;
    pub const X25519: u16 = 0x001d;
    pub const FFDHE2048: u16 = 0x0100;
    pub const FFDHE3072: u16 = 0x0101;
}

/// Signature schemes.
pub mod signature_schemes {
    pub const RSA_PKCS1_SHA1: u16 = 0x0201;
    pub const ECDSA_SHA1: u16 = 0x0203;
    pub const RSA_PKCS1_SHA256: u16 = 0x0401;
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const RSA_PKCS1_SHA384: u16 = 0x0501;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const RSA_PKCS1_SHA512: u16 = 0x0601;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
    pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
    pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;
    pub const ED25519: u16 = 0x0807;
}

/// Protocol version wire values.
pub mod versions {
    pub const TLS10: u16 = 0x0301;
    pub const TLS11: u16 = 0x0302;
    pub const TLS12: u16 = 0x0303;
    pub const TLS13: u16 = 0x0304;
}

/// Certificate compression algorithms (RFC 8879).
pub mod cert_compression {
    pub const ZLIB: u16 = 0x0001;
    pub const BROTLI: u16 = 0x0002;
    pub const ZSTD: u16 = 0x0003;
}

/// Which of the two GREASE extension slots an extension occupies.
///
/// BoringSSL-based clients emit one empty GREASE extension first and one
/// carrying a single zero byte last, with distinct values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreaseSlot {
    First,
    Last,
}

/// One ClientHello extension: its type plus how to build its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionSpec {
    /// GREASE extension with a per-connection type.
    Grease(GreaseSlot),
    /// server_name carrying the target host (omitted for IP literals).
    ServerName,
    ExtendedMasterSecret,
    /// renegotiation_info with an empty renegotiated_connection.
    RenegotiationInfo,
    SupportedGroups(Vec<u16>),
    EcPointFormats(Vec<u8>),
    /// Empty session_ticket (no resumption).
    SessionTicket,
    Alpn(Vec<&'static str>),
    /// OCSP status_request with empty responder list and extensions.
    StatusRequest,
    SignatureAlgorithms(Vec<u16>),
    SignedCertificateTimestamp,
    /// key_share entries for these groups, in order. A GREASE entry carries
    /// a single zero byte.
    KeyShare(Vec<u16>),
    PskKeyExchangeModes(Vec<u8>),
    SupportedVersions(Vec<u16>),
    CompressCertificate(Vec<u16>),
    RecordSizeLimit(u16),
    /// BoringSSL-style padding towards 512 bytes.
    Padding,
    /// Opaque extension emitted verbatim.
    Raw { ext_type: u16, payload: Vec<u8> },
}

impl ExtensionSpec {
    /// Extension type, with GREASE slots reported as the placeholder.
    pub fn ext_type(&self) -> u16 {
        use extensions::*;
        match self {
            Self::Grease(_) => GREASE,
            Self::ServerName => SERVER_NAME,
            Self::ExtendedMasterSecret => EXTENDED_MASTER_SECRET,
            Self::RenegotiationInfo => RENEGOTIATION_INFO,
            Self::SupportedGroups(_) => SUPPORTED_GROUPS,
            Self::EcPointFormats(_) => EC_POINT_FORMATS,
            Self::SessionTicket => SESSION_TICKET,
            Self::Alpn(_) => ALPN,
            Self::StatusRequest => STATUS_REQUEST,
            Self::SignatureAlgorithms(_) => SIGNATURE_ALGORITHMS,
            Self::SignedCertificateTimestamp => SIGNED_CERTIFICATE_TIMESTAMP,
            Self::KeyShare(_) => KEY_SHARE,
            Self::PskKeyExchangeModes(_) => PSK_KEY_EXCHANGE_MODES,
            Self::SupportedVersions(_) => SUPPORTED_VERSIONS,
            Self::CompressCertificate(_) => COMPRESS_CERTIFICATE,
            Self::RecordSizeLimit(_) => RECORD_SIZE_LIMIT,
            Self::Padding => PADDING,
            Self::Raw { ext_type, .. } => *ext_type,
        }
    }
}

/// Wire-level template of one fingerprint's ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    /// Version in the record header carrying the first ClientHello.
    pub record_version: u16,
    /// `legacy_version` field of the ClientHello body.
    pub legacy_version: u16,
    /// Length of the random legacy session id (0 or 32).
    pub session_id_len: u8,
    /// Cipher suites in exact order; may contain [`GREASE`].
    pub cipher_suites: Vec<u16>,
    /// Compression methods (always `[0]` in practice).
    pub compression_methods: Vec<u8>,
    /// Extensions in exact order.
    pub extensions: Vec<ExtensionSpec>,
}

impl ClientHelloSpec {
    /// Extension types in order, GREASE slots as the placeholder.
    pub fn extension_types(&self) -> Vec<u16> {
        self.extensions.iter().map(ExtensionSpec::ext_type).collect()
    }

    /// ALPN protocols this hello offers, empty when it has no ALPN extension.
    pub fn alpn_protocols(&self) -> &[&'static str] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                ExtensionSpec::Alpn(protocols) => Some(protocols.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Supported groups list, empty when absent.
    pub fn supported_groups(&self) -> &[u16] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                ExtensionSpec::SupportedGroups(groups) => Some(groups.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Groups a key share is generated for, in order (may contain GREASE).
    pub fn key_share_groups(&self) -> &[u16] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                ExtensionSpec::KeyShare(groups) => Some(groups.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Signature schemes offered, empty when absent.
    pub fn signature_algorithms(&self) -> &[u16] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                ExtensionSpec::SignatureAlgorithms(schemes) => Some(schemes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Whether this hello offers TLS 1.3 through supported_versions.
    pub fn offers_tls13(&self) -> bool {
        self.extensions.iter().any(|ext| {
            matches!(ext, ExtensionSpec::SupportedVersions(v) if v.contains(&versions::TLS13))
        })
    }

    /// Whether `suite` is offered.
    pub fn offers_cipher(&self, suite: u16) -> bool {
        !is_grease(suite) && self.cipher_suites.contains(&suite)
    }
}
