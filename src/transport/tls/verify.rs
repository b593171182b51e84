//! Server certificate verification (webpki) and handshake signature checks.

use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, SignatureVerificationAlgorithm, TrustAnchor, UnixTime};
use webpki::{EndEntityCert, KeyUsage};

use crate::error::{Error, Result};
use crate::fingerprint::tls::signature_schemes as sig;

/// Trust anchors plus the verification policy for one connector.
#[derive(Clone)]
pub(crate) struct CertVerifier {
    anchors: Arc<Vec<TrustAnchor<'static>>>,
    verify_chain: bool,
}

impl std::fmt::Debug for CertVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertVerifier")
            .field("anchors", &self.anchors.len())
            .field("verify_chain", &self.verify_chain)
            .finish()
    }
}

/// Parse a PEM bundle or a single DER certificate.
pub(crate) fn parse_certificates(data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    if data.starts_with(b"-----BEGIN") {
        let certs = CertificateDer::pem_slice_iter(data)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::certificate(format!("bad PEM: {:?}", e)))?;
        if certs.is_empty() {
            return Err(Error::certificate("no certificates in PEM input"));
        }
        Ok(certs)
    } else {
        Ok(vec![CertificateDer::from(data.to_vec())])
    }
}

impl CertVerifier {
    /// webpki-roots plus `extra` anchors.
    pub(crate) fn new(extra: &[CertificateDer<'static>], verify_chain: bool) -> Result<Self> {
        let mut anchors: Vec<TrustAnchor<'static>> = webpki_roots::TLS_SERVER_ROOTS.to_vec();
        for der in extra {
            let anchor = webpki::anchor_from_trusted_cert(der)
                .map_err(|e| Error::certificate(format!("unusable root certificate: {}", e)))?
                .to_owned();
            anchors.push(anchor);
        }
        Ok(Self {
            anchors: Arc::new(anchors),
            verify_chain,
        })
    }

    /// Chain to a trust anchor and match `server_name` (DNS name or IP).
    pub(crate) fn verify_chain(&self, chain: &[CertificateDer<'static>], server_name: &str) -> Result<()> {
        let (end_entity, intermediates) = chain
            .split_first()
            .ok_or_else(|| Error::certificate("server sent no certificate"))?;

        if !self.verify_chain {
            tracing::warn!(server_name, "certificate verification disabled");
            return Ok(());
        }

        let cert = EndEntityCert::try_from(end_entity)
            .map_err(|e| Error::certificate(format!("unparsable certificate: {}", e)))?;
        cert.verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &self.anchors,
            intermediates,
            UnixTime::now(),
            KeyUsage::server_auth(),
            None,
            None,
        )
        .map_err(|e| Error::certificate(e.to_string()))?;

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::certificate(format!("invalid server name {:?}", server_name)))?;
        cert.verify_is_valid_for_subject_name(&name)
            .map_err(|e| Error::certificate(format!("{} for {}", e, server_name)))?;
        Ok(())
    }

    /// Check a handshake signature made with the end-entity key.
    ///
    /// Runs even when chain verification is disabled.
    pub(crate) fn verify_signature(
        &self,
        end_entity: &CertificateDer<'_>,
        scheme: u16,
        message: &[u8],
        signature: &[u8],
        tls13: bool,
    ) -> Result<()> {
        let algs = verification_algorithms(scheme, tls13);
        if algs.is_empty() {
            return Err(Error::handshake(format!(
                "unsupported signature scheme {:#06x}",
                scheme
            )));
        }
        let cert = EndEntityCert::try_from(end_entity)
            .map_err(|e| Error::certificate(format!("unparsable certificate: {}", e)))?;
        if algs
            .iter()
            .any(|alg| cert.verify_signature(*alg, message, signature).is_ok())
        {
            Ok(())
        } else {
            Err(Error::handshake(format!(
                "bad handshake signature (scheme {:#06x})",
                scheme
            )))
        }
    }
}

/// webpki algorithms that can check `scheme`.
///
/// TLS 1.3 binds ECDSA schemes to a curve and forbids PKCS#1 v1.5 in
/// CertificateVerify; TLS 1.2 ECDSA schemes only name the hash.
fn verification_algorithms(scheme: u16, tls13: bool) -> Vec<&'static dyn SignatureVerificationAlgorithm> {
    use webpki::ring as alg;
    match (scheme, tls13) {
        (sig::ECDSA_SECP256R1_SHA256, true) => vec![alg::ECDSA_P256_SHA256],
        (sig::ECDSA_SECP384R1_SHA384, true) => vec![alg::ECDSA_P384_SHA384],
        (sig::ECDSA_SECP256R1_SHA256, false) => vec![alg::ECDSA_P256_SHA256, alg::ECDSA_P384_SHA256],
        (sig::ECDSA_SECP384R1_SHA384, false) => vec![alg::ECDSA_P384_SHA384, alg::ECDSA_P256_SHA384],
        (sig::RSA_PSS_RSAE_SHA256, _) => vec![alg::RSA_PSS_2048_8192_SHA256_LEGACY_KEY],
        (sig::RSA_PSS_RSAE_SHA384, _) => vec![alg::RSA_PSS_2048_8192_SHA384_LEGACY_KEY],
        (sig::RSA_PSS_RSAE_SHA512, _) => vec![alg::RSA_PSS_2048_8192_SHA512_LEGACY_KEY],
        (sig::ED25519, _) => vec![alg::ED25519],
        (sig::RSA_PKCS1_SHA256, false) => vec![alg::RSA_PKCS1_2048_8192_SHA256],
        (sig::RSA_PKCS1_SHA384, false) => vec![alg::RSA_PKCS1_2048_8192_SHA384],
        (sig::RSA_PKCS1_SHA512, false) => vec![alg::RSA_PKCS1_2048_8192_SHA512],
        _ => Vec::new(),
    }
}

/// The signed content of a TLS 1.3 server CertificateVerify.
pub(crate) fn tls13_verify_message(transcript_hash: &[u8]) -> Vec<u8> {
    let mut msg = vec![0x20u8; 64];
    msg.extend_from_slice(b"TLS 1.3, server CertificateVerify");
    msg.push(0);
    msg.extend_from_slice(transcript_hash);
    msg
}
