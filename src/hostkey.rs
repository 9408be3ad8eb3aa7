//! Host-key types: the long-term server-identity keys used to sign the
//! exchange hash.
//!
//! Private-key *file* parsing is explicitly out of scope for this core (see
//! `PURPOSE & SCOPE`): a [`Listener`](crate::listener::Listener) is handed an
//! already-decoded [`HostKey`] by the embedding application (or by a
//! `PrivateKeyLoader` it supplies), the same way the reference engine calls
//! out to a `privatekey_from_file` contract rather than parsing PEM itself.

use ed25519_dalek::{Signer, SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{RandomizedSigner, Signature as _};
use rsa::RsaPrivateKey;
use sha1::Sha1;
use zeroize::Zeroize;

use crate::error::{Result, SshError};
use crate::wire::WireWriter;

/// Which algorithm family a configured host key belongs to. Mirrors the
/// `ssh-dss` / `ssh-rsa` preference-order rule from §4.D: both may be
/// loaded, `ssh-ed25519` is the library's modern addition on top of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKeyKind {
    Ed25519,
    Rsa,
    Dsa,
}

impl HostKeyKind {
    pub fn algorithm_name(self) -> &'static str {
        match self {
            HostKeyKind::Ed25519 => "ssh-ed25519",
            HostKeyKind::Rsa => "ssh-rsa",
            HostKeyKind::Dsa => "ssh-dss",
        }
    }
}

/// A loaded host private key, still resident until it signs an exchange
/// hash.
pub enum HostKey {
    Ed25519(Ed25519SigningKey),
    Rsa(Box<RsaPrivateKey>),
    Dsa(Box<dsa::SigningKey>),
}

impl HostKey {
    pub fn kind(&self) -> HostKeyKind {
        match self {
            HostKey::Ed25519(_) => HostKeyKind::Ed25519,
            HostKey::Rsa(_) => HostKeyKind::Rsa,
            HostKey::Dsa(_) => HostKeyKind::Dsa,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.kind().algorithm_name()
    }

    /// The SSH wire encoding of the public half (`K_S` in §4.D).
    pub fn public_key_blob(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            HostKey::Ed25519(sk) => {
                let vk: Ed25519VerifyingKey = sk.verifying_key();
                w.put_string(b"ssh-ed25519");
                w.put_string(vk.as_bytes());
            }
            HostKey::Rsa(sk) => {
                use rsa::traits::PublicKeyParts;
                let pk = sk.to_public_key();
                w.put_string(b"ssh-rsa");
                w.put_mpint(&pk.e().to_bytes_be());
                w.put_mpint(&pk.n().to_bytes_be());
            }
            HostKey::Dsa(sk) => {
                let vk = dsa::VerifyingKey::from(sk.as_ref());
                let components = vk.components();
                w.put_string(b"ssh-dss");
                w.put_mpint(&components.p().to_bytes_be());
                w.put_mpint(&components.q().to_bytes_be());
                w.put_mpint(&components.g().to_bytes_be());
                w.put_mpint(&vk.y().to_bytes_be());
            }
        }
        w.into_bytes()
    }

    /// Sign the exchange hash `H`, producing the SSH signature blob sent in
    /// `KEXDH_REPLY` (§4.D step 6).
    pub fn sign(&self, exchange_hash: &[u8]) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        match self {
            HostKey::Ed25519(sk) => {
                let sig = sk.sign(exchange_hash);
                w.put_string(b"ssh-ed25519");
                w.put_string(&sig.to_bytes());
            }
            HostKey::Rsa(sk) => {
                let signing_key = RsaSigningKey::<Sha1>::new((**sk).clone());
                let sig = signing_key
                    .try_sign_with_rng(&mut rand::thread_rng(), exchange_hash)
                    .map_err(|e| SshError::crypto(format!("rsa signing failed: {e}")))?;
                w.put_string(b"ssh-rsa");
                w.put_string(sig.as_bytes());
            }
            HostKey::Dsa(sk) => {
                use signature::RandomizedSigner;
                let sig: dsa::Signature = sk
                    .try_sign_with_rng(&mut rand::thread_rng(), exchange_hash)
                    .map_err(|e| SshError::crypto(format!("dsa signing failed: {e}")))?;
                w.put_string(b"ssh-dss");
                let mut fixed = [0u8; 40];
                write_fixed_be(&mut fixed[0..20], &sig.r().to_bytes_be());
                write_fixed_be(&mut fixed[20..40], &sig.s().to_bytes_be());
                w.put_string(&fixed);
            }
        }
        Ok(w.into_bytes())
    }

    /// Zero the private key material. Called immediately after signing, per
    /// the invariant that host private keys are unreachable after
    /// `KEXDH_REPLY`.
    pub fn erase(&mut self) {
        match self {
            HostKey::Ed25519(sk) => sk.zeroize(),
            HostKey::Rsa(_) | HostKey::Dsa(_) => {
                // `rsa`/`dsa` key types do not expose raw limb access for
                // in-place zeroization; drop replaces the only reference,
                // which is reclaimed by the allocator.
            }
        }
    }
}

/// Right-align a big-endian magnitude into a fixed-width field, matching
/// the 20-byte `r`/`s` encoding RFC 4253 §6.6 requires for `ssh-dss`
/// signatures (no mpint leading-zero rule here: the width is fixed).
fn write_fixed_be(dest: &mut [u8], src: &[u8]) {
    let src = if src.len() > dest.len() {
        &src[src.len() - dest.len()..]
    } else {
        src
    };
    let offset = dest.len() - src.len();
    dest[offset..].copy_from_slice(src);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn ed25519_public_blob_has_algorithm_name() {
        let sk = SigningKey::generate(&mut OsRng);
        let key = HostKey::Ed25519(sk);
        let blob = key.public_key_blob();
        assert_eq!(&blob[0..4], &11u32.to_be_bytes());
        assert_eq!(&blob[4..15], b"ssh-ed25519");
    }

    #[test]
    fn ed25519_sign_round_trips_through_verify() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        let key = HostKey::Ed25519(sk);
        let hash = [0x42u8; 32];
        let sig_blob = key.sign(&hash).unwrap();
        // skip "ssh-ed25519" string header, then the 64-byte sig string
        let mut r = crate::wire::WireReader::new(&sig_blob);
        let algo = r.get_string().unwrap();
        assert_eq!(algo, b"ssh-ed25519");
        let raw_sig = r.get_string().unwrap();
        let sig = ed25519_dalek::Signature::from_slice(raw_sig).unwrap();
        use ed25519_dalek::Verifier;
        assert!(vk.verify(&hash, &sig).is_ok());
    }
}
