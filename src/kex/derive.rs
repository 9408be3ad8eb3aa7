//! NEWKEYS key-derivation expansion: `HASH(K || H || X || session_id)`,
//! rehashing to extend when an algorithm needs more key material than one
//! hash output provides (§4.D NEWKEYS reception, step 1).

use crate::wire::WireWriter;

use super::KexHash;

/// Derive one of the six session keys (`'A'..='F'`).
///
/// `k` is the shared secret's big-endian magnitude (will be mpint-encoded
/// internally, matching how `K` is folded into every other exchange-hash
/// computation); `h` is the exchange hash; `session_id` is the first
/// exchange hash computed on this connection (reused as salt even after
/// later re-derivations, per RFC 4253 §7.2 — though this core never
/// re-keys, so in practice `h == session_id` the only time this runs).
pub fn derive_key(hash: KexHash, k: &[u8], h: &[u8], letter: u8, session_id: &[u8], size: usize) -> Vec<u8> {
    let mut k_mpint = WireWriter::new();
    k_mpint.put_mpint(k);
    let k_mpint = k_mpint.into_bytes();

    let mut seed = Vec::with_capacity(k_mpint.len() + h.len() + 1 + session_id.len());
    seed.extend_from_slice(&k_mpint);
    seed.extend_from_slice(h);
    seed.push(letter);
    seed.extend_from_slice(session_id);

    let mut result = hash.digest(&seed);
    while result.len() < size {
        let mut more = Vec::with_capacity(k_mpint.len() + h.len() + result.len());
        more.extend_from_slice(&k_mpint);
        more.extend_from_slice(h);
        more.extend_from_slice(&result);
        result.extend_from_slice(&hash.digest(&more));
    }
    result.truncate(size);
    result
}

/// The six keys installed into a `CryptoContext` on NEWKEYS: IV/key/MAC
/// key per direction.
pub struct DerivedKeys {
    pub iv_client_to_server: Vec<u8>,
    pub iv_server_to_client: Vec<u8>,
    pub key_client_to_server: Vec<u8>,
    pub key_server_to_client: Vec<u8>,
    pub mac_key_client_to_server: Vec<u8>,
    pub mac_key_server_to_client: Vec<u8>,
}

/// Sizes each direction's negotiated cipher/MAC needs, kept separate per
/// direction since client->server and server->client algorithms are
/// negotiated independently and need not match.
pub struct DirectionSizes {
    pub iv_client_to_server: usize,
    pub iv_server_to_client: usize,
    pub key_client_to_server: usize,
    pub key_server_to_client: usize,
    pub mac_client_to_server: usize,
    pub mac_server_to_client: usize,
}

pub fn derive_all(hash: KexHash, k: &[u8], h: &[u8], session_id: &[u8], sizes: &DirectionSizes) -> DerivedKeys {
    DerivedKeys {
        iv_client_to_server: derive_key(hash, k, h, b'A', session_id, sizes.iv_client_to_server),
        iv_server_to_client: derive_key(hash, k, h, b'B', session_id, sizes.iv_server_to_client),
        key_client_to_server: derive_key(hash, k, h, b'C', session_id, sizes.key_client_to_server),
        key_server_to_client: derive_key(hash, k, h, b'D', session_id, sizes.key_server_to_client),
        mac_key_client_to_server: derive_key(hash, k, h, b'E', session_id, sizes.mac_client_to_server),
        mac_key_server_to_client: derive_key(hash, k, h, b'F', session_id, sizes.mac_server_to_client),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_extends_by_rehashing_when_size_exceeds_output() {
        let k = [0x01u8, 0x02, 0x03];
        let h = [0xAAu8; 32];
        let session_id = [0xBBu8; 32];
        let long = derive_key(KexHash::Sha256, &k, &h, b'A', &session_id, 64);
        assert_eq!(long.len(), 64);
        let short = derive_key(KexHash::Sha256, &k, &h, b'A', &session_id, 32);
        assert_eq!(&long[..32], short.as_slice());
    }

    #[test]
    fn different_letters_give_different_keys() {
        let k = [0x01u8, 0x02, 0x03];
        let h = [0xAAu8; 32];
        let session_id = [0xBBu8; 32];
        let a = derive_key(KexHash::Sha256, &k, &h, b'A', &session_id, 32);
        let b = derive_key(KexHash::Sha256, &k, &h, b'B', &session_id, 32);
        assert_ne!(a, b);
    }
}
