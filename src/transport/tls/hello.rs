//! ClientHello construction from a [`ClientHelloSpec`], and a parser for
//! inspecting hellos on the wire (JA3).

use std::net::IpAddr;

use rand::Rng;
use ring::rand::SystemRandom;

use super::codec::{put_u16, put_vec16, put_vec8, with_len16, with_len24, Reader};
use super::keys::KeyShare;
use crate::error::{Error, Result};
use crate::fingerprint::tls::{extensions, is_grease, ClientHelloSpec, ExtensionSpec, GreaseSlot, GREASE};

pub(crate) const HANDSHAKE_CLIENT_HELLO: u8 = 1;

/// Per-connection GREASE values, one per list that carries GREASE.
///
/// Derived the way BoringSSL does: a random seed byte per slot, mapped to
/// `0x?a?a`; the two extension values are forced apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreaseValues {
    pub cipher: u16,
    pub group: u16,
    pub ext_first: u16,
    pub ext_last: u16,
    pub version: u16,
}

impl GreaseValues {
    pub fn from_seed(seed: [u8; 5]) -> Self {
        let value = |b: u8| (((b & 0xf0) | 0x0a) as u16) * 0x0101;
        let ext_first = value(seed[2]);
        let mut ext_last = value(seed[3]);
        if ext_last == ext_first {
            ext_last ^= 0x1010;
        }
        Self {
            cipher: value(seed[0]),
            group: value(seed[1]),
            ext_first,
            ext_last,
            version: value(seed[4]),
        }
    }

    pub fn random() -> Self {
        Self::from_seed(rand::thread_rng().gen())
    }
}

/// Everything that varies between two hellos of the same profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloParams {
    /// SNI host; `None` omits the extension.
    pub server_name: Option<String>,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub grease: GreaseValues,
    /// key_share entries in wire order: (group, key_exchange).
    pub key_shares: Vec<(u16, Vec<u8>)>,
    /// Cookie echoed after a HelloRetryRequest.
    pub cookie: Option<Vec<u8>>,
}

/// SNI value for a host, `None` for IP literals.
pub(crate) fn sni_for(host: &str) -> Option<String> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(host.trim_end_matches('.').to_ascii_lowercase())
    }
}

/// Fresh parameters plus the private halves of the key shares.
pub(crate) fn fresh_params(
    spec: &ClientHelloSpec,
    server_name: Option<String>,
    rng: &SystemRandom,
) -> Result<(HelloParams, Vec<KeyShare>)> {
    let mut thread_rng = rand::thread_rng();
    let random: [u8; 32] = thread_rng.gen();
    let mut session_id = vec![0u8; spec.session_id_len as usize];
    thread_rng.fill(&mut session_id[..]);
    let grease = GreaseValues::random();

    let mut wire = Vec::new();
    let mut keys = Vec::new();
    for &group in spec.key_share_groups() {
        if group == GREASE {
            wire.push((grease.group, vec![0]));
            continue;
        }
        let share = KeyShare::generate(group, rng)?;
        wire.push((group, share.public().to_vec()));
        keys.push(share);
    }

    Ok((
        HelloParams {
            server_name,
            random,
            session_id,
            grease,
            key_shares: wire,
            cookie: None,
        },
        keys,
    ))
}

/// BoringSSL padding rule: length of the padding payload for a hello whose
/// unpadded encoding (handshake header included) is `unpadded` bytes.
pub(crate) fn padding_len(unpadded: usize) -> Option<usize> {
    if unpadded > 0xff && unpadded < 0x200 {
        let pad = 0x200 - unpadded;
        Some(if pad >= 4 + 1 { pad - 4 } else { 1 })
    } else {
        None
    }
}

fn substitute(list: &[u16], grease: u16) -> impl Iterator<Item = u16> + '_ {
    list.iter().map(move |&v| if v == GREASE { grease } else { v })
}

fn extension_body(ext: &ExtensionSpec, params: &HelloParams) -> Option<(u16, Vec<u8>)> {
    let g = &params.grease;
    let mut body = Vec::new();
    let ext_type = match ext {
        ExtensionSpec::Grease(GreaseSlot::First) => g.ext_first,
        ExtensionSpec::Grease(GreaseSlot::Last) => {
            body.push(0);
            g.ext_last
        }
        ExtensionSpec::ServerName => {
            let host = params.server_name.as_ref()?;
            with_len16(&mut body, |out| {
                out.push(0); // host_name
                put_vec16(out, host.as_bytes());
            });
            extensions::SERVER_NAME
        }
        ExtensionSpec::RenegotiationInfo => {
            body.push(0);
            extensions::RENEGOTIATION_INFO
        }
        ExtensionSpec::SupportedGroups(list) => {
            with_len16(&mut body, |out| {
                substitute(list, g.group).for_each(|v| put_u16(out, v))
            });
            extensions::SUPPORTED_GROUPS
        }
        ExtensionSpec::EcPointFormats(formats) => {
            put_vec8(&mut body, formats);
            extensions::EC_POINT_FORMATS
        }
        ExtensionSpec::Alpn(protocols) => {
            with_len16(&mut body, |out| {
                for p in protocols {
                    put_vec8(out, p.as_bytes());
                }
            });
            extensions::ALPN
        }
        ExtensionSpec::StatusRequest => {
            // ocsp, empty responder_id_list, empty request_extensions
            body.extend_from_slice(&[1, 0, 0, 0, 0]);
            extensions::STATUS_REQUEST
        }
        ExtensionSpec::SignatureAlgorithms(list) => {
            with_len16(&mut body, |out| list.iter().for_each(|&v| put_u16(out, v)));
            extensions::SIGNATURE_ALGORITHMS
        }
        ExtensionSpec::KeyShare(_) => {
            with_len16(&mut body, |out| {
                for (group, key) in &params.key_shares {
                    put_u16(out, *group);
                    put_vec16(out, key);
                }
            });
            extensions::KEY_SHARE
        }
        ExtensionSpec::PskKeyExchangeModes(modes) => {
            put_vec8(&mut body, modes);
            extensions::PSK_KEY_EXCHANGE_MODES
        }
        ExtensionSpec::SupportedVersions(list) => {
            let mut inner = Vec::new();
            substitute(list, g.version).for_each(|v| put_u16(&mut inner, v));
            put_vec8(&mut body, &inner);
            extensions::SUPPORTED_VERSIONS
        }
        ExtensionSpec::CompressCertificate(algs) => {
            let mut inner = Vec::new();
            algs.iter().for_each(|&v| put_u16(&mut inner, v));
            put_vec8(&mut body, &inner);
            extensions::COMPRESS_CERTIFICATE
        }
        ExtensionSpec::RecordSizeLimit(limit) => {
            put_u16(&mut body, *limit);
            extensions::RECORD_SIZE_LIMIT
        }
        ExtensionSpec::Raw { ext_type, payload } => {
            body.extend_from_slice(payload);
            *ext_type
        }
        ExtensionSpec::ExtendedMasterSecret
        | ExtensionSpec::SessionTicket
        | ExtensionSpec::SignedCertificateTimestamp
        | ExtensionSpec::Padding => ext.ext_type(),
    };
    Some((ext_type, body))
}

/// Encode a ClientHello handshake message (without record framing).
///
/// Cipher suites and extensions come out in exactly the template's order.
/// The only extension the template does not list is the HelloRetryRequest
/// cookie, which goes right after key_share.
pub fn encode_client_hello(spec: &ClientHelloSpec, params: &HelloParams) -> Vec<u8> {
    let mut exts: Vec<(u16, Vec<u8>)> = Vec::with_capacity(spec.extensions.len() + 1);
    let mut padding_at = None;
    for ext in &spec.extensions {
        if matches!(ext, ExtensionSpec::Padding) {
            padding_at = Some(exts.len());
            continue;
        }
        let Some(encoded) = extension_body(ext, params) else {
            continue;
        };
        let is_key_share = encoded.0 == extensions::KEY_SHARE;
        exts.push(encoded);
        if is_key_share {
            if let Some(cookie) = &params.cookie {
                let mut body = Vec::new();
                put_vec16(&mut body, cookie);
                exts.push((extensions::COOKIE, body));
            }
        }
    }

    let mut hello = Vec::new();
    put_u16(&mut hello, spec.legacy_version);
    hello.extend_from_slice(&params.random);
    put_vec8(&mut hello, &params.session_id);
    with_len16(&mut hello, |out| {
        substitute(&spec.cipher_suites, params.grease.cipher).for_each(|v| put_u16(out, v))
    });
    put_vec8(&mut hello, &spec.compression_methods);

    if let Some(at) = padding_at {
        let unpadded = 4
            + hello.len()
            + 2
            + exts.iter().map(|(_, body)| 4 + body.len()).sum::<usize>();
        if let Some(len) = padding_len(unpadded) {
            exts.insert(at, (extensions::PADDING, vec![0; len]));
        }
    }

    with_len16(&mut hello, |out| {
        for (ext_type, body) in &exts {
            put_u16(out, *ext_type);
            put_vec16(out, body);
        }
    });

    let mut msg = vec![HANDSHAKE_CLIENT_HELLO];
    with_len24(&mut msg, |out| out.extend_from_slice(&hello));
    msg
}

/// A ClientHello as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientHello {
    pub legacy_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<(u16, Vec<u8>)>,
}

impl ParsedClientHello {
    /// Parse a ClientHello, either a bare handshake message or one wrapped
    /// in a single TLS record.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        if bytes.first() == Some(&0x16) {
            r.take(3)?;
            r = Reader::new(r.vec16()?);
        }
        if r.u8()? != HANDSHAKE_CLIENT_HELLO {
            return Err(Error::handshake("not a ClientHello"));
        }
        let mut body = Reader::new(r.vec24()?);

        let legacy_version = body.u16()?;
        let mut random = [0u8; 32];
        random.copy_from_slice(body.take(32)?);
        let session_id = body.vec8()?.to_vec();

        let mut suites = Reader::new(body.vec16()?);
        let mut cipher_suites = Vec::new();
        while !suites.is_empty() {
            cipher_suites.push(suites.u16()?);
        }
        let compression_methods = body.vec8()?.to_vec();

        let mut extensions = Vec::new();
        if !body.is_empty() {
            let mut exts = Reader::new(body.vec16()?);
            while !exts.is_empty() {
                let ext_type = exts.u16()?;
                extensions.push((ext_type, exts.vec16()?.to_vec()));
            }
        }
        body.finish("ClientHello")?;

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }

    pub fn extension_types(&self) -> Vec<u16> {
        self.extensions.iter().map(|(t, _)| *t).collect()
    }

    pub fn extension(&self, ext_type: u16) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|(t, _)| *t == ext_type)
            .map(|(_, body)| body.as_slice())
    }

    pub fn server_name(&self) -> Option<String> {
        let mut r = Reader::new(self.extension(extensions::SERVER_NAME)?);
        let mut list = Reader::new(r.vec16().ok()?);
        if list.u8().ok()? != 0 {
            return None;
        }
        String::from_utf8(list.vec16().ok()?.to_vec()).ok()
    }

    pub fn alpn_protocols(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(body) = self.extension(extensions::ALPN) {
            let mut r = Reader::new(body);
            if let Ok(list) = r.vec16() {
                let mut list = Reader::new(list);
                while let Ok(p) = list.vec8() {
                    out.push(String::from_utf8_lossy(p).into_owned());
                }
            }
        }
        out
    }

    fn u16_list(&self, ext_type: u16) -> Vec<u16> {
        let mut out = Vec::new();
        if let Some(body) = self.extension(ext_type) {
            let mut r = Reader::new(body);
            if let Ok(list) = r.vec16() {
                let mut list = Reader::new(list);
                while let Ok(v) = list.u16() {
                    out.push(v);
                }
            }
        }
        out
    }

    pub fn supported_groups(&self) -> Vec<u16> {
        self.u16_list(extensions::SUPPORTED_GROUPS)
    }

    pub fn signature_algorithms(&self) -> Vec<u16> {
        self.u16_list(extensions::SIGNATURE_ALGORITHMS)
    }

    pub fn ec_point_formats(&self) -> Vec<u8> {
        self.extension(extensions::EC_POINT_FORMATS)
            .and_then(|body| Reader::new(body).vec8().ok())
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// Groups of the key_share entries, in order.
    pub fn key_share_groups(&self) -> Vec<u16> {
        let mut out = Vec::new();
        if let Some(body) = self.extension(extensions::KEY_SHARE) {
            let mut r = Reader::new(body);
            if let Ok(list) = r.vec16() {
                let mut list = Reader::new(list);
                while let (Ok(group), Ok(_)) = (list.u16(), list.vec16()) {
                    out.push(group);
                }
            }
        }
        out
    }

    /// JA3 string: `version,ciphers,extensions,groups,formats`, GREASE removed.
    pub fn ja3_string(&self) -> String {
        fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
            items.map(|v| v.to_string()).collect::<Vec<_>>().join("-")
        }
        let not_grease = |v: &u16| !is_grease(*v);
        format!(
            "{},{},{},{},{}",
            self.legacy_version,
            join(self.cipher_suites.iter().copied().filter(not_grease)),
            join(self.extension_types().into_iter().filter(not_grease)),
            join(self.supported_groups().into_iter().filter(not_grease)),
            join(self.ec_point_formats().into_iter()),
        )
    }
}
