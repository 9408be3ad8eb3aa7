//! Per-direction cipher/MAC state: `CryptoContext` installed by NEWKEYS.
//!
//! Generalizes the teacher's single hardcoded `aes128-ctr` +
//! `hmac-sha2-256` pair into small enums dispatching on the negotiated
//! algorithm name, and splits the session's crypto into `current`/`next`
//! contexts the way §3 describes (even though this core never re-keys, so
//! `next` only ever gets installed once, at NEWKEYS).

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac as HmacMac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{Result, SshError};

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// A negotiated symmetric cipher, holding whatever running state it needs
/// to keep encrypting/decrypting across packets (CTR mode has no padding
/// concerns and carries its own keystream position).
///
/// `Clone` lets the framer peek at a packet's length field by decrypting a
/// throwaway copy of the keystream before committing to consuming it from
/// the real cipher (see `packet::PacketFramer::try_decode`).
#[derive(Clone)]
pub enum Cipher {
    Aes128Ctr(Aes128Ctr),
    None,
}

impl Cipher {
    pub fn new(name: &str, key: &[u8], iv: &[u8]) -> Result<Self> {
        match name {
            "aes128-ctr" => {
                let cipher = Aes128Ctr::new_from_slices(key, iv)
                    .map_err(|e| SshError::crypto(format!("bad aes128-ctr key/iv length: {e}")))?;
                Ok(Cipher::Aes128Ctr(cipher))
            }
            "none" => Ok(Cipher::None),
            other => Err(SshError::crypto(format!("unsupported cipher: {other}"))),
        }
    }

    pub fn block_size(name: &str) -> Result<usize> {
        match name {
            "aes128-ctr" => Ok(16),
            "none" => Ok(8),
            other => Err(SshError::crypto(format!("unsupported cipher: {other}"))),
        }
    }

    pub fn key_size(name: &str) -> Result<usize> {
        match name {
            "aes128-ctr" => Ok(16),
            "none" => Ok(0),
            other => Err(SshError::crypto(format!("unsupported cipher: {other}"))),
        }
    }

    pub fn iv_size(name: &str) -> Result<usize> {
        match name {
            "aes128-ctr" => Ok(16),
            "none" => Ok(0),
            other => Err(SshError::crypto(format!("unsupported cipher: {other}"))),
        }
    }

    /// Apply the keystream in place (encrypt and decrypt are the same
    /// operation for a stream cipher in CTR mode).
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            Cipher::Aes128Ctr(c) => c.apply_keystream(data),
            Cipher::None => {}
        }
    }

    /// Block size of the running instance, used by the framer to compute
    /// padding.
    pub fn block_size_hint(&self) -> usize {
        match self {
            Cipher::Aes128Ctr(_) => 16,
            Cipher::None => 8,
        }
    }
}

/// A negotiated MAC algorithm plus its key.
pub enum Mac {
    HmacSha256 { key: [u8; 32] },
    HmacSha1 { key: [u8; 20] },
    None,
}

impl Mac {
    pub fn new(name: &str, key: &[u8]) -> Result<Self> {
        match name {
            "hmac-sha2-256" => {
                let mut k = [0u8; 32];
                let n = key.len().min(32);
                k[..n].copy_from_slice(&key[..n]);
                Ok(Mac::HmacSha256 { key: k })
            }
            "hmac-sha1" => {
                let mut k = [0u8; 20];
                let n = key.len().min(20);
                k[..n].copy_from_slice(&key[..n]);
                Ok(Mac::HmacSha1 { key: k })
            }
            "none" => Ok(Mac::None),
            other => Err(SshError::crypto(format!("unsupported mac: {other}"))),
        }
    }

    pub fn key_size(name: &str) -> Result<usize> {
        match name {
            "hmac-sha2-256" => Ok(32),
            "hmac-sha1" => Ok(20),
            "none" => Ok(0),
            other => Err(SshError::crypto(format!("unsupported mac: {other}"))),
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Mac::HmacSha256 { .. } => 32,
            Mac::HmacSha1 { .. } => 20,
            Mac::None => 0,
        }
    }

    /// `MAC(key, seq || unencrypted_packet)`, computed over the plaintext
    /// packet before encryption, per §4.B.
    pub fn compute(&self, seq: u32, packet: &[u8]) -> Vec<u8> {
        match self {
            Mac::HmacSha256 { key } => {
                let mut mac = <HmacSha256 as HmacMac>::new_from_slice(key).expect("any key length valid for hmac");
                mac.update(&seq.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            Mac::HmacSha1 { key } => {
                let mut mac = <HmacSha1 as HmacMac>::new_from_slice(key).expect("any key length valid for hmac");
                mac.update(&seq.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            Mac::None => Vec::new(),
        }
    }

    pub fn verify(&self, seq: u32, packet: &[u8], tag: &[u8]) -> bool {
        let expected = self.compute(seq, packet);
        // constant-time-ish compare is nice to have but not load-bearing
        // here: a timing leak on MAC failure only accelerates learning
        // "this connection is dead", not secret recovery.
        expected.as_slice() == tag
    }
}

/// One direction's installed cipher + MAC + sequence number.
pub struct DirectionalCrypto {
    pub cipher: Cipher,
    pub mac: Mac,
    pub seq: u32,
}

impl DirectionalCrypto {
    /// `initial_seq` is the count of packets this direction has already
    /// sent/received in cleartext before NEWKEYS (KEXINIT, KEXDH_INIT/
    /// REPLY, NEWKEYS itself) — sequence numbers are per-connection, not
    /// per-crypto-installation, and must not restart at zero here (§4.B:
    /// "sequence persists across the NEWKEYS transition; it does not
    /// reset").
    pub fn new(
        cipher_name: &str,
        mac_name: &str,
        cipher_key: &[u8],
        iv: &[u8],
        mac_key: &[u8],
        initial_seq: u32,
    ) -> Result<Self> {
        Ok(Self {
            cipher: Cipher::new(cipher_name, cipher_key, iv)?,
            mac: Mac::new(mac_name, mac_key)?,
            seq: initial_seq,
        })
    }

    pub fn next_seq(&mut self) -> u32 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }
}

/// The full crypto state for a session: `current` is what the framer uses
/// right now, `next` is whatever NEWKEYS installs. Sequence numbers live on
/// `DirectionalCrypto` and persist across the NEWKEYS swap (§4.B: "sequence
/// persists across the NEWKEYS transition; it does not reset").
pub struct CryptoContext {
    pub client_to_server: Option<DirectionalCrypto>,
    pub server_to_client: Option<DirectionalCrypto>,
}

impl CryptoContext {
    pub fn none() -> Self {
        Self {
            client_to_server: None,
            server_to_client: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.client_to_server.is_some() && self.server_to_client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_mac_round_trips() {
        let mac = Mac::new("hmac-sha2-256", &[0x11u8; 32]).unwrap();
        let tag = mac.compute(0, b"hello world");
        assert!(mac.verify(0, b"hello world", &tag));
        assert!(!mac.verify(1, b"hello world", &tag));
    }

    #[test]
    fn aes128_ctr_is_reversible() {
        let key = [0x22u8; 16];
        let iv = [0x33u8; 16];
        let mut enc = Cipher::new("aes128-ctr", &key, &iv).unwrap();
        let mut dec = Cipher::new("aes128-ctr", &key, &iv).unwrap();
        let mut data = b"the quick brown fox".to_vec();
        let original = data.clone();
        enc.apply(&mut data);
        assert_ne!(data, original);
        dec.apply(&mut data);
        assert_eq!(data, original);
    }
}
