//! RFC 2409 / RFC 3526 MODP groups used by the classic
//! `diffie-hellman-group{1,14}-*` KEX algorithms.

use num_bigint_dig::BigUint;

pub struct ModpGroup {
    p_hex: &'static str,
    g: u32,
}

impl ModpGroup {
    pub fn p(&self) -> BigUint {
        BigUint::parse_bytes(self.p_hex.as_bytes(), 16).expect("static MODP prime is valid hex")
    }

    pub fn g(&self) -> BigUint {
        BigUint::from(self.g)
    }
}

/// Oakley Group 2 (1024-bit MODP), used by `diffie-hellman-group1-sha1`.
pub static GROUP1: ModpGroup = ModpGroup {
    p_hex: concat!(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
        "129024E088A67CC74020BBEA63B139B22514A08798E3404",
        "DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C2",
        "45E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7",
        "EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
        "FFFFFFFFFFFFFFFF"
    ),
    g: 2,
};

/// RFC 3526 Group 14 (2048-bit MODP), used by
/// `diffie-hellman-group14-sha256`.
pub static GROUP14: ModpGroup = ModpGroup {
    p_hex: concat!(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129",
        "024E088A67CC74020BBEA63B139B22514A08798E3404DDEF95",
        "19B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B5",
        "76625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7EDEE386BFB",
        "5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A1",
        "63BF0598DA48361C55D39A69163FA8FD24CF5F83655D23DCA3",
        "AD961C62F356208552BB9ED529077096966D670C354E4ABC98",
        "04F1746C08CA18217C32905E462E36CE3BE39E772C180E8603",
        "9B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF69558171839",
        "95497CEA956AE515D2261898FA051015728E5A8AACAA68FFFF",
        "FFFFFFFFFFFF"
    ),
    g: 2,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group1_parses_to_1024_bits() {
        let p = GROUP1.p();
        assert_eq!(p.bits(), 1024);
    }

    #[test]
    fn group14_parses_to_2048_bits() {
        let p = GROUP14.p();
        assert_eq!(p.bits(), 2048);
    }

    /// Byte-for-byte against RFC 3526 §3, not just bit length — a
    /// same-length wrong prime would still pass the bits() check above.
    #[test]
    fn group14_matches_rfc3526_exactly() {
        let expected = concat!(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
            "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
            "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
            "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
            "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
            "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
            "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
            "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF"
        );
        assert_eq!(GROUP14.p().to_str_radix(16).to_uppercase(), expected);
    }
}
