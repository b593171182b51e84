//! Client handshake driver for TLS 1.3 and TLS 1.2 (ECDHE + AEAD).
//!
//! The ClientHello comes from a [`ClientHelloSpec`]; everything after it
//! follows whatever the server negotiates. Progress is tracked in a
//! [`HandshakeState`] so failures can be reported with the state they
//! happened in.

use ring::rand::SystemRandom;
use rustls_pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite};

use super::codec::{handshake_message, put_u24, put_vec8, Reader};
use super::compress::decompress_certificate;
use super::hello::{encode_client_hello, fresh_params, sni_for, HelloParams};
use super::keys::{can_agree, KeyShare};
use super::record::{alert_name, content_type, RecordCipher, RecordLayer, MAX_FRAGMENT};
use super::schedule::{
    finished_mac, key_block, prf, suite_params, traffic_keys, KeySchedule, SuiteParams, Transcript,
};
use super::stream::{TlsStream, TrafficSecrets};
use super::verify::{tls13_verify_message, CertVerifier};
use crate::error::{Error, Result};
use crate::fingerprint::tls::{extensions, is_grease, versions, ClientHelloSpec, ExtensionSpec};
use crate::fingerprint::HelloId;
use crate::transport::session::NegotiatedSession;
use crate::version::TlsVersion;

const SERVER_HELLO: u8 = 2;
const NEW_SESSION_TICKET: u8 = 4;
const ENCRYPTED_EXTENSIONS: u8 = 8;
const CERTIFICATE: u8 = 11;
const SERVER_KEY_EXCHANGE: u8 = 12;
const CERTIFICATE_REQUEST: u8 = 13;
const SERVER_HELLO_DONE: u8 = 14;
const CERTIFICATE_VERIFY: u8 = 15;
const CLIENT_KEY_EXCHANGE: u8 = 16;
const FINISHED: u8 = 20;
const CERTIFICATE_STATUS: u8 = 22;
const COMPRESSED_CERTIFICATE: u8 = 25;

pub(crate) const MAX_HANDSHAKE_MESSAGE: usize = 1 << 20;

/// ServerHello.random of a HelloRetryRequest (SHA-256 of "HelloRetryRequest").
const HELLO_RETRY_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

const DOWNGRADE_TLS12: &[u8; 8] = b"DOWNGRD\x01";
const DOWNGRADE_TLS11: &[u8; 8] = b"DOWNGRD\x00";

/// Where a connection attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Dialing,
    SpecResolved,
    HelloSent,
    ServerHelloReceived,
    KeyExchangeInProgress,
    Established,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

/// Records and logs state transitions for one connection attempt.
#[derive(Debug)]
pub(crate) struct StateTracker {
    host: String,
    state: HandshakeState,
}

impl StateTracker {
    pub(crate) fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            state: HandshakeState::Idle,
        }
    }

    pub(crate) fn advance(&mut self, next: HandshakeState) {
        tracing::debug!(host = %self.host, from = ?self.state, to = ?next, "handshake state");
        self.state = next;
    }

    /// Mark the attempt failed, logging the state it failed in.
    pub(crate) fn fail(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!(host = %self.host, state = ?self.state, %error, "handshake failed");
        self.state = HandshakeState::Failed;
    }
}

/// Immutable inputs of one handshake.
pub(crate) struct HandshakeConfig<'a> {
    pub spec: &'static ClientHelloSpec,
    pub hello_id: &'a HelloId,
    /// Host used for SNI (unless an IP literal) and name verification.
    pub host: &'a str,
    pub verifier: &'a CertVerifier,
}

enum Incoming {
    Message(Vec<u8>),
    ChangeCipherSpec,
}

struct ServerHello {
    legacy_version: u16,
    random: [u8; 32],
    session_id: Vec<u8>,
    cipher_suite: u16,
    extensions: Vec<(u16, Vec<u8>)>,
}

impl ServerHello {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let legacy_version = r.u16()?;
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?.to_vec();
        let cipher_suite = r.u16()?;
        if r.u8()? != 0 {
            return Err(Error::handshake("server selected compression"));
        }
        let extensions = parse_extensions(&mut r)?;
        r.finish("ServerHello")?;
        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suite,
            extensions,
        })
    }

    fn ext(&self, ext_type: u16) -> Option<&[u8]> {
        find_ext(&self.extensions, ext_type)
    }
}

fn find_ext(exts: &[(u16, Vec<u8>)], ext_type: u16) -> Option<&[u8]> {
    exts.iter()
        .find(|(t, _)| *t == ext_type)
        .map(|(_, body)| body.as_slice())
}

/// Plaintext bytes per record the peer accepts (RFC 8449).
///
/// The TLS 1.3 limit counts the inner content type byte.
fn peer_record_limit(exts: &[(u16, Vec<u8>)], tls13: bool) -> Result<Option<usize>> {
    let Some(body) = find_ext(exts, extensions::RECORD_SIZE_LIMIT) else {
        return Ok(None);
    };
    let mut r = Reader::new(body);
    let limit = r.u16()? as usize;
    r.finish("record_size_limit")?;
    if limit < 64 {
        return Err(Error::handshake(format!("record_size_limit {} below 64", limit)));
    }
    let plaintext = if tls13 { limit - 1 } else { limit };
    Ok(Some(plaintext.min(MAX_FRAGMENT)))
}

/// Optional extension block; duplicates are a decode error.
fn parse_extensions(r: &mut Reader<'_>) -> Result<Vec<(u16, Vec<u8>)>> {
    let mut out: Vec<(u16, Vec<u8>)> = Vec::new();
    if r.is_empty() {
        return Ok(out);
    }
    let mut list = Reader::new(r.vec16()?);
    while !list.is_empty() {
        let ext_type = list.u16()?;
        let body = list.vec16()?.to_vec();
        if out.iter().any(|(t, _)| *t == ext_type) {
            return Err(Error::handshake(format!("duplicate extension {:#06x}", ext_type)));
        }
        out.push((ext_type, body));
    }
    Ok(out)
}

fn parse_certificate_tls13(body: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut r = Reader::new(body);
    if !r.vec8()?.is_empty() {
        return Err(Error::handshake("server Certificate with request context"));
    }
    let mut list = Reader::new(r.vec24()?);
    r.finish("Certificate")?;
    let mut chain = Vec::new();
    while !list.is_empty() {
        chain.push(CertificateDer::from(list.vec24()?.to_vec()));
        // per-certificate extensions (OCSP, SCT) are not used
        list.vec16()?;
    }
    Ok(chain)
}

fn parse_certificate_tls12(body: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut r = Reader::new(body);
    let mut list = Reader::new(r.vec24()?);
    r.finish("Certificate")?;
    let mut chain = Vec::new();
    while !list.is_empty() {
        chain.push(CertificateDer::from(list.vec24()?.to_vec()));
    }
    Ok(chain)
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

struct Handshake<'a, S> {
    layer: RecordLayer<S>,
    pending: Vec<u8>,
    transcript: Transcript,
    config: &'a HandshakeConfig<'a>,
    rng: SystemRandom,
}

/// Run a client handshake over an already-connected stream.
///
/// I/O failures before the session is established (reset, early close)
/// come back as `HandshakeFailed`.
pub(crate) async fn client_handshake<S>(
    io: S,
    config: &HandshakeConfig<'_>,
    tracker: &mut StateTracker,
) -> Result<(TlsStream<S>, NegotiatedSession)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = Handshake {
        layer: RecordLayer::new(io, config.spec.record_version),
        pending: Vec::new(),
        transcript: Transcript::default(),
        config,
        rng: SystemRandom::new(),
    };
    handshake.run(tracker).await.map_err(|e| match e {
        Error::Transport(io_err) => {
            Error::handshake(format!("connection failed during handshake: {}", io_err))
        }
        other => other,
    })
}

impl<'a, S> Handshake<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn spec(&self) -> &'static ClientHelloSpec {
        self.config.spec
    }

    fn pop_message(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pending.len() < 4 {
            return Ok(None);
        }
        let len = ((self.pending[1] as usize) << 16)
            | ((self.pending[2] as usize) << 8)
            | self.pending[3] as usize;
        if len > MAX_HANDSHAKE_MESSAGE {
            return Err(Error::handshake(format!("handshake message too large: {}", len)));
        }
        if self.pending.len() < 4 + len {
            return Ok(None);
        }
        Ok(Some(self.pending.drain(..4 + len).collect()))
    }

    async fn next_incoming(&mut self) -> Result<Incoming> {
        loop {
            if let Some(msg) = self.pop_message()? {
                tracing::trace!(msg_type = msg[0], len = msg.len() - 4, "handshake message");
                return Ok(Incoming::Message(msg));
            }
            let (typ, payload) = self.layer.read_record().await?;
            match typ {
                content_type::HANDSHAKE => {
                    if payload.is_empty() {
                        return Err(Error::handshake("empty handshake record"));
                    }
                    self.pending.extend_from_slice(&payload);
                }
                content_type::CHANGE_CIPHER_SPEC => {
                    if !self.pending.is_empty() || payload[..] != [1] {
                        return Err(Error::handshake("malformed ChangeCipherSpec"));
                    }
                    return Ok(Incoming::ChangeCipherSpec);
                }
                content_type::ALERT => {
                    let description = payload.get(1).copied().unwrap_or(255);
                    return Err(Error::handshake(format!(
                        "server sent alert {}",
                        alert_name(description)
                    )));
                }
                other => {
                    return Err(Error::handshake(format!(
                        "unexpected record type {} during handshake",
                        other
                    )))
                }
            }
        }
    }

    /// Next handshake message; ChangeCipherSpec is an error.
    async fn next_message(&mut self) -> Result<Vec<u8>> {
        match self.next_incoming().await? {
            Incoming::Message(msg) => Ok(msg),
            Incoming::ChangeCipherSpec => Err(Error::handshake("unexpected ChangeCipherSpec")),
        }
    }

    /// Next handshake message, skipping TLS 1.3 compatibility CCS records.
    async fn next_message_tls13(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Incoming::Message(msg) = self.next_incoming().await? {
                return Ok(msg);
            }
        }
    }

    fn ensure_type(msg: &[u8], expected: u8) -> Result<()> {
        if msg[0] == expected {
            Ok(())
        } else {
            Err(Error::handshake(format!(
                "unexpected handshake message {} (wanted {})",
                msg[0], expected
            )))
        }
    }

    fn check_suite(&self, id: u16, tls13: bool) -> Result<SuiteParams> {
        if !self.spec().offers_cipher(id) {
            return Err(Error::handshake(format!(
                "server selected cipher suite {:#06x} that was not offered",
                id
            )));
        }
        let suite = suite_params(id)
            .ok_or_else(|| Error::handshake(format!("cipher suite {:#06x} is not supported", id)))?;
        if suite.tls13 != tls13 {
            return Err(Error::handshake(format!(
                "cipher suite {:#06x} does not match the negotiated version",
                id
            )));
        }
        Ok(suite)
    }

    fn check_extensions(&self, exts: &[(u16, Vec<u8>)]) -> Result<()> {
        let offered = self.spec().extension_types();
        for (ext_type, _) in exts {
            let allowed = *ext_type == extensions::COOKIE
                || (!is_grease(*ext_type) && offered.contains(ext_type));
            if !allowed {
                return Err(Error::handshake(format!(
                    "server sent unsolicited extension {:#06x}",
                    ext_type
                )));
            }
        }
        Ok(())
    }

    fn check_scheme(&self, scheme: u16) -> Result<()> {
        if self.spec().signature_algorithms().contains(&scheme) {
            Ok(())
        } else {
            Err(Error::handshake(format!(
                "server signed with scheme {:#06x} that was not offered",
                scheme
            )))
        }
    }

    fn selected_alpn(&self, exts: &[(u16, Vec<u8>)]) -> Result<String> {
        let Some(body) = find_ext(exts, extensions::ALPN) else {
            return Ok(String::new());
        };
        let mut r = Reader::new(body);
        let mut list = Reader::new(r.vec16()?);
        r.finish("ALPN")?;
        let protocol = list.vec8()?;
        list.finish("ALPN")?;
        let protocol = String::from_utf8(protocol.to_vec())
            .map_err(|_| Error::handshake("non-UTF-8 ALPN protocol"))?;
        if !self.spec().alpn_protocols().contains(&protocol.as_str()) {
            return Err(Error::handshake(format!(
                "server selected ALPN {:?} that was not offered",
                protocol
            )));
        }
        Ok(protocol)
    }

    fn negotiated_version(&self, sh: &ServerHello) -> Result<TlsVersion> {
        if let Some(body) = sh.ext(extensions::SUPPORTED_VERSIONS) {
            let mut r = Reader::new(body);
            let version = r.u16()?;
            r.finish("supported_versions")?;
            if version == versions::TLS13 && self.spec().offers_tls13() {
                return Ok(TlsVersion::Tls13);
            }
            return Err(Error::handshake(format!(
                "protocol_version: server selected {:#06x}",
                version
            )));
        }
        if sh.legacy_version != versions::TLS12 {
            return Err(Error::handshake(format!(
                "protocol_version: server selected {:#06x}",
                sh.legacy_version
            )));
        }
        if self.spec().offers_tls13() {
            let tail = &sh.random[24..];
            if tail == DOWNGRADE_TLS12 || tail == DOWNGRADE_TLS11 {
                return Err(Error::handshake("downgrade sentinel in ServerHello.random"));
            }
        }
        Ok(TlsVersion::Tls12)
    }

    /// Rebuild hello parameters for the second ClientHello.
    fn apply_retry(
        &self,
        hrr: &ServerHello,
        params: &mut HelloParams,
        keys: &mut Vec<KeyShare>,
    ) -> Result<u16> {
        self.check_extensions(&hrr.extensions)?;
        let mut changed = false;
        let mut group = keys.first().map(|k| k.group()).unwrap_or(0);

        if let Some(body) = hrr.ext(extensions::KEY_SHARE) {
            let mut r = Reader::new(body);
            let requested = r.u16()?;
            r.finish("HelloRetryRequest key_share")?;
            let offered = self.spec().supported_groups();
            if !offered.contains(&requested) || is_grease(requested) {
                return Err(Error::handshake(format!(
                    "HelloRetryRequest for group {:#06x} that was not offered",
                    requested
                )));
            }
            if keys.iter().any(|k| k.group() == requested) {
                return Err(Error::handshake(
                    "HelloRetryRequest for a group that already had a key share",
                ));
            }
            if !can_agree(requested) {
                return Err(Error::handshake(format!(
                    "HelloRetryRequest for unsupported group {:#06x}",
                    requested
                )));
            }
            let share = KeyShare::generate(requested, &self.rng)?;
            params.key_shares = vec![(requested, share.public().to_vec())];
            *keys = vec![share];
            group = requested;
            changed = true;
        }

        if let Some(body) = hrr.ext(extensions::COOKIE) {
            let mut r = Reader::new(body);
            params.cookie = Some(r.vec16()?.to_vec());
            r.finish("cookie")?;
            changed = true;
        }

        if !changed {
            return Err(Error::handshake("HelloRetryRequest would not change the ClientHello"));
        }
        Ok(group)
    }

    async fn run(mut self, tracker: &mut StateTracker) -> Result<(TlsStream<S>, NegotiatedSession)> {
        let sni = sni_for(self.config.host);
        let (mut params, mut keys) = fresh_params(self.spec(), sni, &self.rng)?;
        let hello = encode_client_hello(self.spec(), &params);
        self.transcript.add(&hello);
        self.layer.write_record(content_type::HANDSHAKE, &hello).await?;
        tracker.advance(HandshakeState::HelloSent);

        let mut msg = self.next_message().await?;
        Self::ensure_type(&msg, SERVER_HELLO)?;
        let mut sh = ServerHello::parse(&msg[4..])?;
        let mut hello_retry = false;
        let mut ccs_sent = false;

        if sh.random == HELLO_RETRY_RANDOM {
            hello_retry = true;
            if self.negotiated_version(&sh)? != TlsVersion::Tls13 {
                return Err(Error::handshake("HelloRetryRequest without TLS 1.3"));
            }
            let suite = self.check_suite(sh.cipher_suite, true)?;
            let group = self.apply_retry(&sh, &mut params, &mut keys)?;
            tracing::debug!(group = format_args!("{:#06x}", group), "server sent HelloRetryRequest");

            self.transcript.rewrite_for_retry(suite.hash);
            self.transcript.add(&msg);
            let hello = encode_client_hello(self.spec(), &params);
            self.transcript.add(&hello);
            if !params.session_id.is_empty() {
                self.layer.write_change_cipher_spec().await?;
                ccs_sent = true;
            }
            self.layer.plain_version = versions::TLS12;
            self.layer.write_record(content_type::HANDSHAKE, &hello).await?;

            msg = self.next_message_tls13().await?;
            Self::ensure_type(&msg, SERVER_HELLO)?;
            let retry_suite = sh.cipher_suite;
            sh = ServerHello::parse(&msg[4..])?;
            if sh.random == HELLO_RETRY_RANDOM {
                return Err(Error::handshake("second HelloRetryRequest"));
            }
            if sh.cipher_suite != retry_suite {
                return Err(Error::handshake("cipher suite changed after HelloRetryRequest"));
            }
        }

        self.transcript.add(&msg);
        let version = self.negotiated_version(&sh)?;
        tracker.advance(HandshakeState::ServerHelloReceived);
        tracing::debug!(
            version = %version,
            cipher_suite = format_args!("{:#06x}", sh.cipher_suite),
            "ServerHello"
        );
        // Plaintext records after the hello carry the negotiated version.
        self.layer.plain_version = versions::TLS12;

        match version {
            TlsVersion::Tls13 => {
                if sh.session_id != params.session_id {
                    return Err(Error::handshake("server did not echo legacy_session_id"));
                }
                self.finish_tls13(sh, params, keys, hello_retry, ccs_sent, tracker).await
            }
            TlsVersion::Tls12 => self.finish_tls12(sh, params, tracker).await,
        }
    }

    async fn finish_tls13(
        mut self,
        sh: ServerHello,
        params: HelloParams,
        mut keys: Vec<KeyShare>,
        hello_retry: bool,
        ccs_sent: bool,
        tracker: &mut StateTracker,
    ) -> Result<(TlsStream<S>, NegotiatedSession)> {
        let suite = self.check_suite(sh.cipher_suite, true)?;
        self.check_extensions(&sh.extensions)?;

        let body = sh
            .ext(extensions::KEY_SHARE)
            .ok_or_else(|| Error::handshake("ServerHello without key_share"))?;
        let mut r = Reader::new(body);
        let group = r.u16()?;
        let server_key = r.vec16()?;
        r.finish("key_share")?;
        let idx = keys
            .iter()
            .position(|k| k.group() == group)
            .ok_or_else(|| Error::handshake(format!("server key share for unoffered group {:#06x}", group)))?;
        let shared = keys.swap_remove(idx).agree(server_key)?;
        tracker.advance(HandshakeState::KeyExchangeInProgress);

        let hash = suite.hash;
        let mut schedule = KeySchedule::new(hash);
        schedule.advance(Some(&shared))?;
        let hs_hash = self.transcript.hash(hash);
        let client_hs = schedule.derive(b"c hs traffic", &hs_hash)?;
        let server_hs = schedule.derive(b"s hs traffic", &hs_hash)?;
        let (key, iv) = traffic_keys(&suite, &server_hs)?;
        self.layer.reader = Some(RecordCipher::tls13(&suite, &key, &iv)?);

        let ee = self.next_message_tls13().await?;
        Self::ensure_type(&ee, ENCRYPTED_EXTENSIONS)?;
        let mut r = Reader::new(&ee[4..]);
        let ee_exts = parse_extensions(&mut r)?;
        r.finish("EncryptedExtensions")?;
        self.check_extensions(&ee_exts)?;
        let alpn = self.selected_alpn(&ee_exts)?;
        let record_limit = peer_record_limit(&ee_exts, true)?;
        self.transcript.add(&ee);

        let mut msg = self.next_message_tls13().await?;
        let mut request_context = None;
        if msg[0] == CERTIFICATE_REQUEST {
            let mut r = Reader::new(&msg[4..]);
            request_context = Some(r.vec8()?.to_vec());
            tracing::debug!("server requested a client certificate; sending none");
            self.transcript.add(&msg);
            msg = self.next_message_tls13().await?;
        }

        let chain = match msg[0] {
            CERTIFICATE => parse_certificate_tls13(&msg[4..])?,
            COMPRESSED_CERTIFICATE => {
                let mut r = Reader::new(&msg[4..]);
                let algorithm = r.u16()?;
                let uncompressed_len = r.u24()?;
                let data = r.vec24()?;
                r.finish("CompressedCertificate")?;
                let offered = self.spec().extensions.iter().any(|ext| {
                    matches!(ext, ExtensionSpec::CompressCertificate(algs) if algs.contains(&algorithm))
                });
                if !offered {
                    return Err(Error::handshake(format!(
                        "certificate compressed with unoffered algorithm {:#06x}",
                        algorithm
                    )));
                }
                let body = decompress_certificate(algorithm, data, uncompressed_len)?;
                parse_certificate_tls13(&body)?
            }
            other => {
                return Err(Error::handshake(format!(
                    "unexpected handshake message {} (wanted Certificate)",
                    other
                )))
            }
        };
        self.transcript.add(&msg);
        self.config.verifier.verify_chain(&chain, self.config.host)?;

        let cv = self.next_message_tls13().await?;
        Self::ensure_type(&cv, CERTIFICATE_VERIFY)?;
        let mut r = Reader::new(&cv[4..]);
        let scheme = r.u16()?;
        let signature = r.vec16()?;
        r.finish("CertificateVerify")?;
        self.check_scheme(scheme)?;
        let signed = tls13_verify_message(&self.transcript.hash(hash));
        self.config
            .verifier
            .verify_signature(&chain[0], scheme, &signed, signature, true)?;
        self.transcript.add(&cv);

        let fin = self.next_message_tls13().await?;
        Self::ensure_type(&fin, FINISHED)?;
        let expected = finished_mac(hash, &server_hs, &self.transcript.hash(hash))?;
        if !ct_eq(&expected, &fin[4..]) {
            return Err(Error::handshake("server Finished did not verify"));
        }
        self.transcript.add(&fin);
        if !self.pending.is_empty() {
            return Err(Error::handshake("handshake data spans a key change"));
        }

        let app_hash = self.transcript.hash(hash);
        schedule.advance(None)?;
        let client_ap = schedule.derive(b"c ap traffic", &app_hash)?;
        let server_ap = schedule.derive(b"s ap traffic", &app_hash)?;

        if !ccs_sent && !params.session_id.is_empty() {
            self.layer.write_change_cipher_spec().await?;
        }
        let (key, iv) = traffic_keys(&suite, &client_hs)?;
        self.layer.writer = Some(RecordCipher::tls13(&suite, &key, &iv)?);

        if let Some(context) = request_context {
            let mut body = Vec::new();
            put_vec8(&mut body, &context);
            put_u24(&mut body, 0);
            let empty = handshake_message(CERTIFICATE, &body);
            self.transcript.add(&empty);
            self.layer.write_record(content_type::HANDSHAKE, &empty).await?;
        }
        let verify_data = finished_mac(hash, &client_hs, &self.transcript.hash(hash))?;
        let finished = handshake_message(FINISHED, &verify_data);
        self.layer.write_record(content_type::HANDSHAKE, &finished).await?;

        let (key, iv) = traffic_keys(&suite, &server_ap)?;
        self.layer.reader = Some(RecordCipher::tls13(&suite, &key, &iv)?);
        let (key, iv) = traffic_keys(&suite, &client_ap)?;
        self.layer.writer = Some(RecordCipher::tls13(&suite, &key, &iv)?);

        let session = self.session(TlsVersion::Tls13, suite.id, alpn, chain, group, hello_retry);
        tracker.advance(HandshakeState::Established);
        log_established(&session);
        let secrets = TrafficSecrets {
            suite,
            client: client_ap,
            server: server_ap,
        };
        let stream = TlsStream::new(self.layer, Some(secrets))?.with_record_limit(record_limit);
        Ok((stream, session))
    }

    async fn finish_tls12(
        mut self,
        sh: ServerHello,
        params: HelloParams,
        tracker: &mut StateTracker,
    ) -> Result<(TlsStream<S>, NegotiatedSession)> {
        let suite = self.check_suite(sh.cipher_suite, false)?;
        self.check_extensions(&sh.extensions)?;
        let alpn = self.selected_alpn(&sh.extensions)?;
        let record_limit = peer_record_limit(&sh.extensions, false)?;
        let extended_master_secret = sh.ext(extensions::EXTENDED_MASTER_SECRET).is_some();
        if !extended_master_secret {
            tracing::debug!("server did not negotiate extended master secret");
        }

        let msg = self.next_message().await?;
        Self::ensure_type(&msg, CERTIFICATE)?;
        let chain = parse_certificate_tls12(&msg[4..])?;
        self.transcript.add(&msg);
        self.config.verifier.verify_chain(&chain, self.config.host)?;
        tracker.advance(HandshakeState::KeyExchangeInProgress);

        let mut msg = self.next_message().await?;
        if msg[0] == CERTIFICATE_STATUS {
            self.transcript.add(&msg);
            msg = self.next_message().await?;
        }

        Self::ensure_type(&msg, SERVER_KEY_EXCHANGE)?;
        let ske = &msg[4..];
        let mut r = Reader::new(ske);
        if r.u8()? != 3 {
            return Err(Error::handshake("ServerKeyExchange without a named curve"));
        }
        let group = r.u16()?;
        let server_point = r.vec8()?.to_vec();
        let params_len = 3 + 1 + server_point.len();
        let scheme = r.u16()?;
        let signature = r.vec16()?;
        r.finish("ServerKeyExchange")?;
        if is_grease(group) || !self.spec().supported_groups().contains(&group) || !can_agree(group) {
            return Err(Error::handshake(format!(
                "server chose unsupported group {:#06x}",
                group
            )));
        }
        self.check_scheme(scheme)?;
        let mut signed = Vec::with_capacity(64 + params_len);
        signed.extend_from_slice(&params.random);
        signed.extend_from_slice(&sh.random);
        signed.extend_from_slice(&ske[..params_len]);
        self.config
            .verifier
            .verify_signature(&chain[0], scheme, &signed, signature, false)?;
        self.transcript.add(&msg);

        let mut msg = self.next_message().await?;
        let mut certificate_requested = false;
        if msg[0] == CERTIFICATE_REQUEST {
            tracing::debug!("server requested a client certificate; sending none");
            certificate_requested = true;
            self.transcript.add(&msg);
            msg = self.next_message().await?;
        }
        Self::ensure_type(&msg, SERVER_HELLO_DONE)?;
        if msg.len() != 4 {
            return Err(Error::handshake("ServerHelloDone with a body"));
        }
        self.transcript.add(&msg);

        if certificate_requested {
            let empty = handshake_message(CERTIFICATE, &[0, 0, 0]);
            self.transcript.add(&empty);
            self.layer.write_record(content_type::HANDSHAKE, &empty).await?;
        }

        let share = KeyShare::generate(group, &self.rng)?;
        let mut body = Vec::new();
        put_vec8(&mut body, share.public());
        let cke = handshake_message(CLIENT_KEY_EXCHANGE, &body);
        self.transcript.add(&cke);
        self.layer.write_record(content_type::HANDSHAKE, &cke).await?;
        let premaster = share.agree(&server_point)?;

        let hash = suite.hash;
        let master = if extended_master_secret {
            prf(hash, &premaster, b"extended master secret", &self.transcript.hash(hash), 48)
        } else {
            let mut seed = params.random.to_vec();
            seed.extend_from_slice(&sh.random);
            prf(hash, &premaster, b"master secret", &seed, 48)
        };
        let keys = key_block(&suite, &master, &params.random, &sh.random);

        self.layer.write_change_cipher_spec().await?;
        self.layer.writer = Some(RecordCipher::tls12(&suite, &keys.client_key, &keys.client_iv)?);
        let verify_data = prf(hash, &master, b"client finished", &self.transcript.hash(hash), 12);
        let finished = handshake_message(FINISHED, &verify_data);
        self.transcript.add(&finished);
        self.layer.write_record(content_type::HANDSHAKE, &finished).await?;

        loop {
            match self.next_incoming().await? {
                Incoming::ChangeCipherSpec => break,
                Incoming::Message(msg) if msg[0] == NEW_SESSION_TICKET => {
                    tracing::trace!("ignoring session ticket");
                    self.transcript.add(&msg);
                }
                Incoming::Message(msg) => {
                    return Err(Error::handshake(format!(
                        "unexpected handshake message {} before ChangeCipherSpec",
                        msg[0]
                    )))
                }
            }
        }
        self.layer.reader = Some(RecordCipher::tls12(&suite, &keys.server_key, &keys.server_iv)?);

        let fin = self.next_message().await?;
        Self::ensure_type(&fin, FINISHED)?;
        let expected = prf(hash, &master, b"server finished", &self.transcript.hash(hash), 12);
        if !ct_eq(&expected, &fin[4..]) {
            return Err(Error::handshake("server Finished did not verify"));
        }

        let session = self.session(TlsVersion::Tls12, suite.id, alpn, chain, group, false);
        tracker.advance(HandshakeState::Established);
        log_established(&session);
        let stream = TlsStream::new(self.layer, None)?.with_record_limit(record_limit);
        Ok((stream, session))
    }

    fn session(
        &self,
        version: TlsVersion,
        cipher_suite: u16,
        alpn: String,
        peer_certificates: Vec<CertificateDer<'static>>,
        group: u16,
        hello_retry: bool,
    ) -> NegotiatedSession {
        NegotiatedSession {
            version,
            cipher_suite,
            alpn,
            peer_certificates,
            hello_id: self.config.hello_id.clone(),
            server_name: self.config.host.to_string(),
            group,
            hello_retry,
        }
    }
}

fn log_established(session: &NegotiatedSession) {
    tracing::info!(
        host = %session.server_name,
        profile = %session.hello_id,
        version = %session.version,
        cipher_suite = format_args!("{:#06x}", session.cipher_suite),
        alpn = %session.alpn,
        hello_retry = session.hello_retry,
        "TLS session established"
    );
}
