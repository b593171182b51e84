//! Ephemeral key exchange (X25519, P-256, P-384) on ring.

use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey};
use ring::rand::SystemRandom;

use crate::error::{Error, Result};
use crate::fingerprint::tls::groups;

fn algorithm(group: u16) -> Option<&'static agreement::Algorithm> {
    match group {
        groups::X25519 => Some(&agreement::X25519),
        groups::SECP256R1 => Some(&agreement::ECDH_P256),
        groups::SECP384R1 => Some(&agreement::ECDH_P384),
        _ => None,
    }
}

/// Whether this client can complete a key exchange on `group`.
///
/// Profiles may still advertise other groups (P-521, FFDHE); a server that
/// picks one of those fails the handshake.
pub(crate) fn can_agree(group: u16) -> bool {
    algorithm(group).is_some()
}

/// One ephemeral key pair, consumed by the agreement.
pub(crate) struct KeyShare {
    group: u16,
    private: EphemeralPrivateKey,
    public: Vec<u8>,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("group", &format_args!("{:#06x}", self.group))
            .field("public_len", &self.public.len())
            .finish()
    }
}

impl KeyShare {
    pub(crate) fn generate(group: u16, rng: &SystemRandom) -> Result<Self> {
        let alg = algorithm(group).ok_or_else(|| {
            Error::handshake(format!("no key exchange for group {:#06x}", group))
        })?;
        let private = EphemeralPrivateKey::generate(alg, rng)
            .map_err(|_| Error::handshake("key generation failed"))?;
        let public = private
            .compute_public_key()
            .map_err(|_| Error::handshake("public key computation failed"))?
            .as_ref()
            .to_vec();
        Ok(Self {
            group,
            private,
            public,
        })
    }

    pub(crate) fn group(&self) -> u16 {
        self.group
    }

    pub(crate) fn public(&self) -> &[u8] {
        &self.public
    }

    /// Derive the shared secret with the peer's public value.
    pub(crate) fn agree(self, peer: &[u8]) -> Result<Vec<u8>> {
        let alg = algorithm(self.group)
            .ok_or_else(|| Error::handshake("key exchange group vanished"))?;
        let peer = UnparsedPublicKey::new(alg, peer);
        agreement::agree_ephemeral(self.private, &peer, |secret| secret.to_vec())
            .map_err(|_| Error::handshake("invalid peer key share"))
    }
}
