//! Browser fingerprint profiles.
//!
//! Every profile maps a [`HelloId`] to the [`ClientHelloSpec`] a browser of
//! that version put on the wire. The catalogue is built once per process and
//! never mutated afterwards, so lookups need no locking.
//!
//! Note: these are the pre-permutation shapes. Chrome randomizes extension
//! order since v110, so none of the Chromium profiles here match a current
//! Chrome.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::tls::{
    cert_compression, cipher_suites as cs, groups, signature_schemes as sig, versions,
    ClientHelloSpec, ExtensionSpec as Ext, GreaseSlot, GREASE,
};
use crate::error::{Error, Result};

/// Name of a fingerprint profile: which client, which version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HelloId {
    pub client: Cow<'static, str>,
    pub version: Cow<'static, str>,
}

impl HelloId {
    pub const CHROME_72: HelloId = HelloId::from_static("Chrome", "72");
    pub const CHROME_83: HelloId = HelloId::from_static("Chrome", "83");
    pub const EDGE_85: HelloId = HelloId::from_static("Edge", "85");
    pub const FIREFOX_56: HelloId = HelloId::from_static("Firefox", "56");
    pub const FIREFOX_65: HelloId = HelloId::from_static("Firefox", "65");
    pub const IOS_12_1: HelloId = HelloId::from_static("iOS", "12.1");

    const fn from_static(client: &'static str, version: &'static str) -> Self {
        Self {
            client: Cow::Borrowed(client),
            version: Cow::Borrowed(version),
        }
    }

    /// Create an identifier from arbitrary parts.
    ///
    /// Whether it names a catalogued profile is only known at [`lookup`].
    pub fn new(client: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client: Cow::Owned(client.into()),
            version: Cow::Owned(version.into()),
        }
    }
}

impl Default for HelloId {
    fn default() -> Self {
        Self::CHROME_72
    }
}

impl fmt::Display for HelloId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.client, self.version)
    }
}

impl FromStr for HelloId {
    type Err = Error;

    /// Accepts `Chrome-72`, `chrome_72`, `firefox/65`, `ios 12.1`.
    ///
    /// Client names are matched case-insensitively and canonicalized.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (client, version) = s
            .split_once(['-', '_', '/', ' '])
            .filter(|(c, v)| !c.is_empty() && !v.is_empty())
            .ok_or_else(|| Error::UnknownProfile(s.to_string()))?;

        let client = match client.to_ascii_lowercase().as_str() {
            "chrome" => Cow::Borrowed("Chrome"),
            "edge" => Cow::Borrowed("Edge"),
            "firefox" => Cow::Borrowed("Firefox"),
            "ios" => Cow::Borrowed("iOS"),
            _ => Cow::Owned(client.to_string()),
        };
        // chrome_12_1 style separators inside the version
        let version = version.replace('_', ".");

        Ok(Self {
            client,
            version: Cow::Owned(version),
        })
    }
}

fn registry() -> &'static HashMap<HelloId, ClientHelloSpec> {
    static REGISTRY: OnceLock<HashMap<HelloId, ClientHelloSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        tracing::debug!("building fingerprint registry");
        HashMap::from([
            (HelloId::CHROME_72, chrome_72()),
            (HelloId::CHROME_83, chrome_83()),
            (HelloId::EDGE_85, edge_85()),
            (HelloId::FIREFOX_56, firefox_56()),
            (HelloId::FIREFOX_65, firefox_65()),
            (HelloId::IOS_12_1, ios_12_1()),
        ])
    })
}

/// Resolve a profile to its ClientHello template.
///
/// Returns the same `'static` record on every call.
pub fn lookup(id: &HelloId) -> Result<&'static ClientHelloSpec> {
    registry()
        .get(id)
        .ok_or_else(|| Error::UnknownProfile(id.to_string()))
}

/// All catalogued profiles, sorted by name.
pub fn registered() -> Vec<HelloId> {
    let mut ids: Vec<HelloId> = registry().keys().cloned().collect();
    ids.sort_by_key(|id| id.to_string());
    ids
}

fn chromium_hello(ciphers: Vec<u16>, sigalgs: Vec<u16>) -> ClientHelloSpec {
    ClientHelloSpec {
        record_version: versions::TLS10,
        legacy_version: versions::TLS12,
        session_id_len: 32,
        cipher_suites: ciphers,
        compression_methods: vec![0],
        extensions: vec![
            Ext::Grease(GreaseSlot::First),
            Ext::ServerName,
            Ext::ExtendedMasterSecret,
            Ext::RenegotiationInfo,
            Ext::SupportedGroups(vec![GREASE, groups::X25519, groups::SECP256R1, groups::SECP384R1]),
            Ext::EcPointFormats(vec![0]),
            Ext::SessionTicket,
            Ext::Alpn(vec!["h2", "http/1.1"]),
            Ext::StatusRequest,
            Ext::SignatureAlgorithms(sigalgs),
            Ext::SignedCertificateTimestamp,
            Ext::KeyShare(vec![GREASE, groups::X25519]),
            Ext::PskKeyExchangeModes(vec![1]),
            Ext::SupportedVersions(vec![
                GREASE,
                versions::TLS13,
                versions::TLS12,
                versions::TLS11,
                versions::TLS10,
            ]),
            Ext::CompressCertificate(vec![cert_compression::BROTLI]),
            Ext::Grease(GreaseSlot::Last),
            Ext::Padding,
        ],
    }
}

fn chromium_ciphers() -> Vec<u16> {
    vec![
        GREASE,
        cs::TLS_AES_128_GCM_SHA256,
        cs::TLS_AES_256_GCM_SHA384,
        cs::TLS_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
    ]
}

fn chromium_sigalgs() -> Vec<u16> {
    vec![
        sig::ECDSA_SECP256R1_SHA256,
        sig::RSA_PSS_RSAE_SHA256,
        sig::RSA_PKCS1_SHA256,
        sig::ECDSA_SECP384R1_SHA384,
        sig::RSA_PSS_RSAE_SHA384,
        sig::RSA_PKCS1_SHA384,
        sig::RSA_PSS_RSAE_SHA512,
        sig::RSA_PKCS1_SHA512,
    ]
}

/// Chrome 72: still offers 3DES and PKCS#1 SHA-1.
fn chrome_72() -> ClientHelloSpec {
    let mut ciphers = chromium_ciphers();
    ciphers.push(cs::TLS_RSA_WITH_3DES_EDE_CBC_SHA);
    let mut sigalgs = chromium_sigalgs();
    sigalgs.push(sig::RSA_PKCS1_SHA1);
    chromium_hello(ciphers, sigalgs)
}

fn chrome_83() -> ClientHelloSpec {
    chromium_hello(chromium_ciphers(), chromium_sigalgs())
}

fn edge_85() -> ClientHelloSpec {
    chromium_hello(chromium_ciphers(), chromium_sigalgs())
}

fn firefox_ciphers(with_tls13: bool) -> Vec<u16> {
    let mut ciphers = Vec::new();
    if with_tls13 {
        ciphers.extend([
            cs::TLS_AES_128_GCM_SHA256,
            cs::TLS_CHACHA20_POLY1305_SHA256,
            cs::TLS_AES_256_GCM_SHA384,
        ]);
    }
    ciphers.extend([
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_DHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
    ]);
    ciphers
}

fn firefox_sigalgs() -> Vec<u16> {
    vec![
        sig::ECDSA_SECP256R1_SHA256,
        sig::ECDSA_SECP384R1_SHA384,
        sig::ECDSA_SECP521R1_SHA512,
        sig::RSA_PSS_RSAE_SHA256,
        sig::RSA_PSS_RSAE_SHA384,
        sig::RSA_PSS_RSAE_SHA512,
        sig::RSA_PKCS1_SHA256,
        sig::RSA_PKCS1_SHA384,
        sig::RSA_PKCS1_SHA512,
        sig::ECDSA_SHA1,
        sig::RSA_PKCS1_SHA1,
    ]
}

/// Firefox 56: TLS 1.2 only, no supported_versions.
fn firefox_56() -> ClientHelloSpec {
    ClientHelloSpec {
        record_version: versions::TLS10,
        legacy_version: versions::TLS12,
        session_id_len: 32,
        cipher_suites: firefox_ciphers(false),
        compression_methods: vec![0],
        extensions: vec![
            Ext::ServerName,
            Ext::ExtendedMasterSecret,
            Ext::RenegotiationInfo,
            Ext::SupportedGroups(vec![
                groups::X25519,
                groups::SECP256R1,
                groups::SECP384R1,
                groups::SECP521R1,
            ]),
            Ext::EcPointFormats(vec![0]),
            Ext::SessionTicket,
            Ext::Alpn(vec!["h2", "http/1.1"]),
            Ext::StatusRequest,
            Ext::SignatureAlgorithms(firefox_sigalgs()),
            Ext::Padding,
        ],
    }
}

/// Firefox 65: two key shares up front and a record_size_limit.
fn firefox_65() -> ClientHelloSpec {
    ClientHelloSpec {
        record_version: versions::TLS10,
        legacy_version: versions::TLS12,
        session_id_len: 32,
        cipher_suites: firefox_ciphers(true),
        compression_methods: vec![0],
        extensions: vec![
            Ext::ServerName,
            Ext::ExtendedMasterSecret,
            Ext::RenegotiationInfo,
            Ext::SupportedGroups(vec![
                groups::X25519,
                groups::SECP256R1,
                groups::SECP384R1,
                groups::SECP521R1,
                groups::FFDHE2048,
                groups::FFDHE3072,
            ]),
            Ext::EcPointFormats(vec![0]),
            Ext::SessionTicket,
            Ext::Alpn(vec!["h2", "http/1.1"]),
            Ext::StatusRequest,
            Ext::KeyShare(vec![groups::X25519, groups::SECP256R1]),
            Ext::SupportedVersions(vec![
                versions::TLS13,
                versions::TLS12,
                versions::TLS11,
                versions::TLS10,
            ]),
            Ext::SignatureAlgorithms(firefox_sigalgs()),
            Ext::PskKeyExchangeModes(vec![1]),
            Ext::RecordSizeLimit(0x4001),
            Ext::Padding,
        ],
    }
}

/// Safari on iOS 12.1.
fn ios_12_1() -> ClientHelloSpec {
    ClientHelloSpec {
        record_version: versions::TLS10,
        legacy_version: versions::TLS12,
        session_id_len: 32,
        cipher_suites: vec![
            GREASE,
            cs::TLS_AES_128_GCM_SHA256,
            cs::TLS_AES_256_GCM_SHA384,
            cs::TLS_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384,
            cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_RSA_WITH_AES_256_CBC_SHA256,
            cs::TLS_RSA_WITH_AES_128_CBC_SHA256,
            cs::TLS_RSA_WITH_AES_256_CBC_SHA,
            cs::TLS_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA,
            cs::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
        ],
        compression_methods: vec![0],
        extensions: vec![
            Ext::Grease(GreaseSlot::First),
            Ext::ServerName,
            Ext::ExtendedMasterSecret,
            Ext::RenegotiationInfo,
            Ext::SupportedGroups(vec![
                GREASE,
                groups::X25519,
                groups::SECP256R1,
                groups::SECP384R1,
                groups::SECP521R1,
            ]),
            Ext::EcPointFormats(vec![0]),
            Ext::Alpn(vec!["h2", "h2-16", "h2-15", "h2-14", "spdy/3.1", "spdy/3", "http/1.1"]),
            Ext::StatusRequest,
            // The duplicated PSS-SHA384 entry is what Safari 12.1 sends.
            Ext::SignatureAlgorithms(vec![
                sig::ECDSA_SECP256R1_SHA256,
                sig::RSA_PSS_RSAE_SHA256,
                sig::RSA_PKCS1_SHA256,
                sig::ECDSA_SECP384R1_SHA384,
                sig::ECDSA_SHA1,
                sig::RSA_PSS_RSAE_SHA384,
                sig::RSA_PSS_RSAE_SHA384,
                sig::RSA_PKCS1_SHA384,
                sig::RSA_PSS_RSAE_SHA512,
                sig::RSA_PKCS1_SHA512,
                sig::RSA_PKCS1_SHA1,
            ]),
            Ext::SignedCertificateTimestamp,
            Ext::KeyShare(vec![GREASE, groups::X25519]),
            Ext::PskKeyExchangeModes(vec![1]),
            Ext::SupportedVersions(vec![
                GREASE,
                versions::TLS13,
                versions::TLS12,
                versions::TLS11,
                versions::TLS10,
            ]),
            Ext::Grease(GreaseSlot::Last),
            Ext::Padding,
        ],
    }
}
