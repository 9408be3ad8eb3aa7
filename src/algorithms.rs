//! Algorithm-name plumbing: the 10 parallel KEXINIT name-list categories,
//! the intersection rule, and the library's supported defaults.
//!
//! The upstream engine this core is descended from held these as a bare
//! `[Vec<String>; 10]` with indices threaded through a loop bound by
//! `j <= 0` where `j >= 0` was intended, walking one category past the end
//! on certain negotiation paths. That bug is not reproduced here: each
//! category gets a named field, so there is no index to get wrong. See
//! DESIGN.md for why this departs from a literal line-for-line port.

use crate::error::{Result, SshError};
use crate::wire::{WireReader, WireWriter};

/// One side's offered algorithm names, one list per category, plus the
/// trailing `first_kex_packet_follows` flag and reserved word.
#[derive(Debug, Clone)]
pub struct KexInit {
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub server_host_key_algorithms: Vec<String>,
    pub encryption_client_to_server: Vec<String>,
    pub encryption_server_to_client: Vec<String>,
    pub mac_client_to_server: Vec<String>,
    pub mac_server_to_client: Vec<String>,
    pub compression_client_to_server: Vec<String>,
    pub compression_server_to_client: Vec<String>,
    pub languages_client_to_server: Vec<String>,
    pub languages_server_to_client: Vec<String>,
    pub first_kex_packet_follows: bool,
}

impl KexInit {
    /// Build the server's own offer. `cookie` should be 16 fresh random
    /// bytes; `host_key_algorithms` is whatever the listener's loaded host
    /// keys support, in preference order.
    pub fn server_offer(cookie: [u8; 16], host_key_algorithms: Vec<String>) -> Self {
        Self {
            cookie,
            kex_algorithms: SUPPORTED_KEX.iter().map(|s| s.to_string()).collect(),
            server_host_key_algorithms: host_key_algorithms,
            encryption_client_to_server: SUPPORTED_CIPHERS.iter().map(|s| s.to_string()).collect(),
            encryption_server_to_client: SUPPORTED_CIPHERS.iter().map(|s| s.to_string()).collect(),
            mac_client_to_server: SUPPORTED_MACS.iter().map(|s| s.to_string()).collect(),
            mac_server_to_client: SUPPORTED_MACS.iter().map(|s| s.to_string()).collect(),
            compression_client_to_server: vec!["none".to_string()],
            compression_server_to_client: vec!["none".to_string()],
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: false,
        }
    }

    /// Serialize as the KEXINIT payload (message type byte not included;
    /// the framer/dispatcher prepends it).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(256);
        w.put_raw(&self.cookie);
        w.put_namelist(&as_str_refs(&self.kex_algorithms));
        w.put_namelist(&as_str_refs(&self.server_host_key_algorithms));
        w.put_namelist(&as_str_refs(&self.encryption_client_to_server));
        w.put_namelist(&as_str_refs(&self.encryption_server_to_client));
        w.put_namelist(&as_str_refs(&self.mac_client_to_server));
        w.put_namelist(&as_str_refs(&self.mac_server_to_client));
        w.put_namelist(&as_str_refs(&self.compression_client_to_server));
        w.put_namelist(&as_str_refs(&self.compression_server_to_client));
        w.put_namelist(&as_str_refs(&self.languages_client_to_server));
        w.put_namelist(&as_str_refs(&self.languages_server_to_client));
        w.put_bool(self.first_kex_packet_follows);
        w.put_u32(0); // reserved
        w.into_bytes()
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let cookie: [u8; 16] = r
            .get_raw(16)?
            .try_into()
            .map_err(|_| SshError::protocol("short KEXINIT cookie"))?;
        let kex_algorithms = r.get_namelist()?;
        let server_host_key_algorithms = r.get_namelist()?;
        let encryption_client_to_server = r.get_namelist()?;
        let encryption_server_to_client = r.get_namelist()?;
        let mac_client_to_server = r.get_namelist()?;
        let mac_server_to_client = r.get_namelist()?;
        let compression_client_to_server = r.get_namelist()?;
        let compression_server_to_client = r.get_namelist()?;
        let languages_client_to_server = r.get_namelist()?;
        let languages_server_to_client = r.get_namelist()?;
        let first_kex_packet_follows = r.get_bool()?;
        let _reserved = r.get_u32()?;
        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_client_to_server,
            encryption_server_to_client,
            mac_client_to_server,
            mac_server_to_client,
            compression_client_to_server,
            compression_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

fn as_str_refs(v: &[String]) -> Vec<&str> {
    v.iter().map(|s| s.as_str()).collect()
}

/// KEX algorithms the core knows how to carry out. Classic modexp groups
/// come first in defaults so the minimal end-to-end scenario (group1-sha1
/// only) still negotiates something; a deployment that cares about modern
/// security should reorder via `ListenerConfig`.
pub const SUPPORTED_KEX: &[&str] = &[
    "curve25519-sha256",
    "diffie-hellman-group14-sha256",
    "diffie-hellman-group1-sha1",
];

pub const SUPPORTED_HOST_KEY_ALGOS: &[&str] = &["ssh-ed25519", "ssh-rsa", "ssh-dss"];

pub const SUPPORTED_CIPHERS: &[&str] = &["aes128-ctr", "none"];

pub const SUPPORTED_MACS: &[&str] = &["hmac-sha2-256", "hmac-sha1"];

/// Negotiated algorithm names, one per category, the outcome of
/// intersecting client and server `KexInit`s.
#[derive(Debug, Clone)]
pub struct NegotiatedAlgorithms {
    pub kex: String,
    pub host_key: String,
    pub cipher_client_to_server: String,
    pub cipher_server_to_client: String,
    pub mac_client_to_server: String,
    pub mac_server_to_client: String,
    pub compress_client_to_server: String,
    pub compress_server_to_client: String,
}

/// Pick the first name in the client's list that also appears in the
/// server's list. Per RFC 4253 §7.1 the client's preference order wins.
fn negotiate_one(client: &[String], server: &[String], category: &str) -> Result<String> {
    client
        .iter()
        .find(|name| server.iter().any(|s| s == *name))
        .cloned()
        .ok_or_else(|| SshError::protocol(format!("no common algorithm for {category}")))
}

pub fn negotiate(client: &KexInit, server: &KexInit) -> Result<NegotiatedAlgorithms> {
    Ok(NegotiatedAlgorithms {
        kex: negotiate_one(&client.kex_algorithms, &server.kex_algorithms, "kex")?,
        host_key: negotiate_one(
            &client.server_host_key_algorithms,
            &server.server_host_key_algorithms,
            "server host key",
        )?,
        cipher_client_to_server: negotiate_one(
            &client.encryption_client_to_server,
            &server.encryption_client_to_server,
            "encryption client->server",
        )?,
        cipher_server_to_client: negotiate_one(
            &client.encryption_server_to_client,
            &server.encryption_server_to_client,
            "encryption server->client",
        )?,
        mac_client_to_server: negotiate_one(
            &client.mac_client_to_server,
            &server.mac_client_to_server,
            "mac client->server",
        )?,
        mac_server_to_client: negotiate_one(
            &client.mac_server_to_client,
            &server.mac_server_to_client,
            "mac server->client",
        )?,
        compress_client_to_server: negotiate_one(
            &client.compression_client_to_server,
            &server.compression_client_to_server,
            "compression client->server",
        )?,
        compress_server_to_client: negotiate_one(
            &client.compression_server_to_client,
            &server.compression_server_to_client,
            "compression server->client",
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kexinit_round_trips() {
        let k = KexInit::server_offer([7u8; 16], vec!["ssh-rsa".into()]);
        let bytes = k.to_bytes();
        let parsed = KexInit::parse(&bytes).unwrap();
        assert_eq!(parsed.cookie, [7u8; 16]);
        assert_eq!(parsed.server_host_key_algorithms, vec!["ssh-rsa".to_string()]);
        assert!(!parsed.first_kex_packet_follows);
    }

    #[test]
    fn negotiate_picks_clients_first_common_choice() {
        let client = KexInit {
            first_kex_packet_follows: false,
            ..KexInit::server_offer(
                [0u8; 16],
                vec!["ssh-rsa".into(), "ssh-ed25519".into()],
            )
        };
        let server = KexInit::server_offer([1u8; 16], vec!["ssh-ed25519".into(), "ssh-rsa".into()]);
        let out = negotiate(&client, &server).unwrap();
        assert_eq!(out.host_key, "ssh-rsa");
    }

    #[test]
    fn negotiate_fails_on_empty_intersection() {
        let mut client = KexInit::server_offer([0u8; 16], vec!["ssh-rsa".into()]);
        client.kex_algorithms = vec!["unknown-kex".into()];
        let server = KexInit::server_offer([1u8; 16], vec!["ssh-rsa".into()]);
        assert!(negotiate(&client, &server).is_err());
    }
}
