//! Cipher suite parameters, handshake transcript and key derivation
//! (TLS 1.3 HKDF schedule, TLS 1.2 PRF).

use ring::{aead, digest, hkdf, hmac};

use crate::error::{Error, Result};
use crate::fingerprint::tls::cipher_suites as cs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    pub(crate) fn digest(&self) -> &'static digest::Algorithm {
        match self {
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
        }
    }

    fn hmac(&self) -> hmac::Algorithm {
        match self {
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha384 => hmac::HMAC_SHA384,
        }
    }

    fn hkdf(&self) -> hkdf::Algorithm {
        match self {
            Self::Sha256 => hkdf::HKDF_SHA256,
            Self::Sha384 => hkdf::HKDF_SHA384,
        }
    }

    pub(crate) fn output_len(&self) -> usize {
        self.digest().output_len()
    }

    pub(crate) fn hash(&self, data: &[u8]) -> Vec<u8> {
        digest::digest(self.digest(), data).as_ref().to_vec()
    }

    pub(crate) fn hmac_sign(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(self.hmac(), key);
        hmac::sign(&key, data).as_ref().to_vec()
    }
}

/// How a suite builds per-record nonces in TLS 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NonceStyle {
    /// 4-byte implicit salt + 8-byte explicit counter carried in the record.
    ExplicitGcm,
    /// 12-byte IV XOR sequence number (TLS 1.3, and ChaCha20 in TLS 1.2).
    XorSequence,
}

/// What the record layer and key schedule need to know about a suite.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SuiteParams {
    pub id: u16,
    pub aead: &'static aead::Algorithm,
    pub hash: HashAlg,
    pub tls13: bool,
    pub nonce: NonceStyle,
}

impl SuiteParams {
    pub(crate) fn key_len(&self) -> usize {
        self.aead.key_len()
    }

    /// IV bytes taken from the key block or the traffic secret.
    pub(crate) fn iv_len(&self) -> usize {
        match self.nonce {
            NonceStyle::ExplicitGcm => 4,
            NonceStyle::XorSequence => 12,
        }
    }
}

/// Suites this client can complete. Anything else a server picks (CBC,
/// static RSA, DHE) fails the handshake.
pub(crate) fn suite_params(id: u16) -> Option<SuiteParams> {
    let (aead, hash, tls13, nonce): (&'static aead::Algorithm, _, _, _) = match id {
        cs::TLS_AES_128_GCM_SHA256 => (&aead::AES_128_GCM, HashAlg::Sha256, true, NonceStyle::XorSequence),
        cs::TLS_AES_256_GCM_SHA384 => (&aead::AES_256_GCM, HashAlg::Sha384, true, NonceStyle::XorSequence),
        cs::TLS_CHACHA20_POLY1305_SHA256 => {
            (&aead::CHACHA20_POLY1305, HashAlg::Sha256, true, NonceStyle::XorSequence)
        }
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 | cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => {
            (&aead::AES_128_GCM, HashAlg::Sha256, false, NonceStyle::ExplicitGcm)
        }
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 | cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 => {
            (&aead::AES_256_GCM, HashAlg::Sha384, false, NonceStyle::ExplicitGcm)
        }
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
        | cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => {
            (&aead::CHACHA20_POLY1305, HashAlg::Sha256, false, NonceStyle::XorSequence)
        }
        _ => return None,
    };
    Some(SuiteParams {
        id,
        aead,
        hash,
        tls13,
        nonce,
    })
}

/// Running handshake transcript.
///
/// Kept as raw bytes because the hash is only known once the server has
/// picked a suite.
#[derive(Debug, Default, Clone)]
pub(crate) struct Transcript {
    bytes: Vec<u8>,
}

impl Transcript {
    pub(crate) fn add(&mut self, message: &[u8]) {
        self.bytes.extend_from_slice(message);
    }

    pub(crate) fn hash(&self, alg: HashAlg) -> Vec<u8> {
        alg.hash(&self.bytes)
    }

    /// Replace ClientHello1 with `message_hash` after a HelloRetryRequest.
    pub(crate) fn rewrite_for_retry(&mut self, alg: HashAlg) {
        let digest = alg.hash(&self.bytes);
        let mut synthetic = vec![254, 0, 0, digest.len() as u8];
        synthetic.extend_from_slice(&digest);
        self.bytes = synthetic;
    }
}

struct Len(usize);

impl hkdf::KeyType for Len {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Extract.
pub(crate) fn hkdf_extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    alg.hmac_sign(salt, ikm)
}

/// HKDF-Expand-Label (RFC 8446 7.1).
pub(crate) fn hkdf_expand_label(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    len: usize,
) -> Result<Vec<u8>> {
    let mut info = Vec::with_capacity(4 + 6 + label.len() + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let prk = hkdf::Prk::new_less_safe(alg.hkdf(), secret);
    let info = [info.as_slice()];
    let okm = prk
        .expand(&info, Len(len))
        .map_err(|_| Error::handshake("hkdf expand length"))?;
    let mut out = vec![0u8; len];
    okm.fill(&mut out)
        .map_err(|_| Error::handshake("hkdf expand fill"))?;
    Ok(out)
}

pub(crate) fn derive_secret(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_len())
}

/// TLS 1.3 key schedule, advanced stage by stage.
pub(crate) struct KeySchedule {
    alg: HashAlg,
    current: Vec<u8>,
}

impl KeySchedule {
    /// Early secret with no PSK.
    pub(crate) fn new(alg: HashAlg) -> Self {
        let zeros = vec![0u8; alg.output_len()];
        Self {
            alg,
            current: hkdf_extract(alg, &zeros, &zeros),
        }
    }

    /// Mix in the next input (ECDHE secret, then zeros for the master secret).
    pub(crate) fn advance(&mut self, ikm: Option<&[u8]>) -> Result<()> {
        let empty = self.alg.hash(&[]);
        let derived = derive_secret(self.alg, &self.current, b"derived", &empty)?;
        let zeros = vec![0u8; self.alg.output_len()];
        self.current = hkdf_extract(self.alg, &derived, ikm.unwrap_or(&zeros));
        Ok(())
    }

    pub(crate) fn derive(&self, label: &[u8], transcript_hash: &[u8]) -> Result<Vec<u8>> {
        derive_secret(self.alg, &self.current, label, transcript_hash)
    }
}

/// Key and IV for one direction, from a TLS 1.3 traffic secret.
pub(crate) fn traffic_keys(suite: &SuiteParams, secret: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let key = hkdf_expand_label(suite.hash, secret, b"key", &[], suite.key_len())?;
    let iv = hkdf_expand_label(suite.hash, secret, b"iv", &[], 12)?;
    Ok((key, iv))
}

/// Next traffic secret after a KeyUpdate.
pub(crate) fn next_traffic_secret(suite: &SuiteParams, secret: &[u8]) -> Result<Vec<u8>> {
    hkdf_expand_label(suite.hash, secret, b"traffic upd", &[], suite.hash.output_len())
}

/// TLS 1.3 Finished verify_data.
pub(crate) fn finished_mac(alg: HashAlg, base_secret: &[u8], transcript_hash: &[u8]) -> Result<Vec<u8>> {
    let key = hkdf_expand_label(alg, base_secret, b"finished", &[], alg.output_len())?;
    Ok(alg.hmac_sign(&key, transcript_hash))
}

/// TLS 1.2 PRF (P_hash over HMAC).
pub(crate) fn prf(alg: HashAlg, secret: &[u8], label: &[u8], seed: &[u8], len: usize) -> Vec<u8> {
    let key = hmac::Key::new(alg.hmac(), secret);
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let mut out = Vec::with_capacity(len);
    let mut a = hmac::sign(&key, &label_seed).as_ref().to_vec();
    while out.len() < len {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(&a);
        ctx.update(&label_seed);
        out.extend_from_slice(ctx.sign().as_ref());
        a = hmac::sign(&key, &a).as_ref().to_vec();
    }
    out.truncate(len);
    out
}

/// Key material for one TLS 1.2 connection.
pub(crate) struct KeyBlock {
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

pub(crate) fn key_block(
    suite: &SuiteParams,
    master: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> KeyBlock {
    let (k, i) = (suite.key_len(), suite.iv_len());
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let block = prf(suite.hash, master, b"key expansion", &seed, 2 * k + 2 * i);
    KeyBlock {
        client_key: block[..k].to_vec(),
        server_key: block[k..2 * k].to_vec(),
        client_iv: block[2 * k..2 * k + i].to_vec(),
        server_iv: block[2 * k + i..].to_vec(),
    }
}
