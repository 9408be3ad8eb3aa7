//! Diffie-Hellman key exchange: classic modexp groups and curve25519.
//!
//! Generalizes the teacher's single hardcoded `curve25519-sha256` exchange
//! into a small enum dispatching on the name the driver negotiated, adding
//! the classic MODP groups the minimal end-to-end scenario requires
//! (`diffie-hellman-group1-sha1`).

mod derive;
mod groups;

pub use derive::{derive_all, derive_key, DerivedKeys, DirectionSizes};

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::error::{Result, SshError};

/// Which hash function a KEX algorithm uses for the exchange hash and,
/// transitively, for key derivation (§4.D step 1 / NEWKEYS key expansion).
#[derive(Debug, Clone, Copy)]
pub enum KexHash {
    Sha1,
    Sha256,
}

impl KexHash {
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            KexHash::Sha1 => Sha1::digest(data).to_vec(),
            KexHash::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            KexHash::Sha1 => 20,
            KexHash::Sha256 => 32,
        }
    }
}

/// Server-side state for one DH exchange in progress (`dh_handshake_state
/// == INIT`, per §4.D, until `KEXDH_REPLY` is built).
pub enum ServerExchange {
    Modp {
        hash: KexHash,
        group: &'static groups::ModpGroup,
        y: BigUint,
        f: BigUint,
    },
    Curve25519 {
        secret: EphemeralSecret,
        public: X25519PublicKey,
    },
}

/// Look up the group/curve for a negotiated KEX algorithm name and
/// generate the server's ephemeral keypair (§4.D step 2: "Generates
/// private exponent y ... computes f = g^y mod p").
pub fn begin_server_exchange(kex_algorithm: &str) -> Result<ServerExchange> {
    match kex_algorithm {
        "diffie-hellman-group1-sha1" => {
            let group = &groups::GROUP1;
            let (y, f) = generate_modp_keypair(group);
            Ok(ServerExchange::Modp {
                hash: KexHash::Sha1,
                group,
                y,
                f,
            })
        }
        "diffie-hellman-group14-sha256" => {
            let group = &groups::GROUP14;
            let (y, f) = generate_modp_keypair(group);
            Ok(ServerExchange::Modp {
                hash: KexHash::Sha256,
                group,
                y,
                f,
            })
        }
        "curve25519-sha256" => {
            let secret = EphemeralSecret::random_from_rng(OsRng);
            let public = X25519PublicKey::from(&secret);
            Ok(ServerExchange::Curve25519 { secret, public })
        }
        other => Err(SshError::protocol(format!("unsupported kex algorithm: {other}"))),
    }
}

fn generate_modp_keypair(group: &groups::ModpGroup) -> (BigUint, BigUint) {
    let p = group.p();
    let g = group.g();
    // y drawn from the full width of p; sufficient for the classic groups
    // this core supports and simpler than the tighter RFC 4419 q bound.
    let mut rng = OsRng;
    let y = rng.gen_biguint(p.bits());
    let f = g.modpow(&y, &p);
    (y, f)
}

impl ServerExchange {
    pub fn hash(&self) -> KexHash {
        match self {
            ServerExchange::Modp { hash, .. } => *hash,
            ServerExchange::Curve25519 { .. } => KexHash::Sha256,
        }
    }

    /// `f`, the server's DH public, as a big-endian magnitude ready for
    /// `WireWriter::put_mpint` (MODP) or raw bytes (curve25519, a fixed
    /// 32-byte string rather than an mpint).
    pub fn server_public_bytes(&self) -> Vec<u8> {
        match self {
            ServerExchange::Modp { f, .. } => f.to_bytes_be(),
            ServerExchange::Curve25519 { public, .. } => public.as_bytes().to_vec(),
        }
    }

    /// Import the client's `e` and compute the shared secret `K`
    /// (§4.D steps 1 and 4). For MODP, returns `K` as a big-endian
    /// magnitude suitable for `put_mpint`; for curve25519, the raw
    /// 32-byte X25519 output treated as an unsigned mpint per RFC 5656-style
    /// conventions used by curve25519-sha256 (draft-ietf-curdle).
    ///
    /// Consumes `self`: an X25519 `EphemeralSecret` can only be used once,
    /// which matches this exchange running exactly once per session (§9,
    /// no re-keying).
    pub fn compute_shared_secret(self, client_public: &[u8]) -> Result<Vec<u8>> {
        match self {
            ServerExchange::Modp { group, y, .. } => {
                let p = group.p();
                let e = BigUint::from_bytes_be(client_public);
                if e < BigUint::from(1u8) || e >= p.clone() - BigUint::from(1u8) {
                    return Err(SshError::crypto("client DH public out of range"));
                }
                let k = e.modpow(&y, &p);
                Ok(k.to_bytes_be())
            }
            ServerExchange::Curve25519 { secret, .. } => {
                if client_public.len() != 32 {
                    return Err(SshError::crypto("curve25519 public must be 32 bytes"));
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(client_public);
                let shared = secret.diffie_hellman(&X25519PublicKey::from(arr));
                Ok(shared.as_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group1_exchange_agrees_both_sides() {
        let group = &groups::GROUP1;
        let p = group.p();
        let g = group.g();
        let mut rng = OsRng;
        let y = rng.gen_biguint(p.bits());
        let f = g.modpow(&y, &p);

        let x = rng.gen_biguint(p.bits());
        let e = g.modpow(&x, &p);

        let k_server = e.modpow(&y, &p);
        let k_client = f.modpow(&x, &p);
        assert_eq!(k_server, k_client);
    }
}
