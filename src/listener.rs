//! Listener: bind/listen/accept, producing an initialized `Session` with
//! host keys attached (§4.C).
//!
//! Private-key *file* parsing is out of scope for this core, so a
//! `Listener` is configured with a `KeyLoader` closure — the external
//! `privatekey_from_file` contract from §6 — rather than reading PEM/
//! OpenSSH-format files itself.

use std::net::{TcpListener as StdTcpListener, TcpStream};
use std::path::PathBuf;

use crate::config::ServerConfig;
use crate::error::{Result, SshError};
use crate::hostkey::{HostKey, HostKeyKind};
use crate::session::Session;

/// The external collaborator that turns a host-key file path into a
/// decoded private key. Swappable for tests.
pub type KeyLoader = dyn Fn(&std::path::Path, HostKeyKind) -> Result<HostKey> + Send + Sync;

/// Per-listener defaults copied onto every `Session` produced by
/// `accept()` (§3 Listener record: "algorithm overrides, log verbosity,
/// blocking flag").
pub struct ListenerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub backlog: u32,
    pub blocking: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 22,
            backlog: 10,
            blocking: true,
        }
    }
}

pub struct Listener {
    pub config: ListenerConfig,
    host_key_paths: Vec<(HostKeyKind, PathBuf)>,
    key_loader: Box<KeyLoader>,
    tcp: Option<StdTcpListener>,
}

impl Listener {
    pub fn new(key_loader: Box<KeyLoader>) -> Self {
        Self {
            config: ListenerConfig::default(),
            host_key_paths: Vec::new(),
            key_loader,
            tcp: None,
        }
    }

    pub fn add_host_key_path(&mut self, kind: HostKeyKind, path: PathBuf) {
        self.host_key_paths.push((kind, path));
    }

    /// Copy bind address, port, blocking flag and host-key paths from a
    /// loaded [`ServerConfig`] onto this listener.
    pub fn apply_config(&mut self, config: &ServerConfig) {
        self.config.bind_addr = config.bind_addr.clone();
        self.config.port = config.port;
        self.config.blocking = config.blocking;
        self.host_key_paths = config.host_key_paths.clone();
    }

    /// Resolve bind address, create a TCP socket with `SO_REUSEADDR`,
    /// bind, and listen with the configured backlog (§4.C `listen()`).
    ///
    /// `std::net::TcpListener::bind` already sets `SO_REUSEADDR` on Unix
    /// targets before binding and the backlog is fixed by the platform's
    /// `listen(2)` default; `ListenerConfig::backlog` is kept so a future
    /// `socket2`-backed implementation has somewhere to plug in an
    /// explicit value without changing this API.
    pub fn listen(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let tcp = StdTcpListener::bind(&addr)
            .map_err(|e| SshError::Io(e))?;
        tcp.set_nonblocking(!self.config.blocking)?;
        self.tcp = Some(tcp);
        Ok(())
    }

    /// Accept one connection and produce an initialized `Session`.
    /// Requires at least one host key path set (§4.C, scenario 2 in §8).
    pub fn accept(&mut self) -> Result<(Session, TcpStream)> {
        if self.host_key_paths.is_empty() {
            return Err(SshError::config(
                "DSA or RSA host key file must be set before accept()",
            ));
        }

        let tcp = self
            .tcp
            .as_ref()
            .ok_or_else(|| SshError::config("listen() must be called before accept()"))?;

        // Load every configured host key fresh for this session; keys are
        // erased from the session after KEXDH_REPLY, so the listener must
        // re-read them for the next connection rather than caching.
        let mut host_keys = Vec::with_capacity(self.host_key_paths.len());
        for (kind, path) in &self.host_key_paths {
            match (self.key_loader)(path, *kind) {
                Ok(key) => host_keys.push(key),
                Err(e) => {
                    // Free whatever was already loaded before propagating.
                    drop(host_keys);
                    return Err(e);
                }
            }
        }

        let (stream, _addr) = tcp.accept().map_err(SshError::Io)?;
        stream.set_nonblocking(!self.config.blocking)?;

        let session = Session::new(host_keys);
        Ok((session, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_loader() -> Box<KeyLoader> {
        Box::new(|_path, _kind| Err(SshError::config("no keys available in test loader")))
    }

    #[test]
    fn accept_without_host_keys_fails_with_exact_message() {
        let mut listener = Listener::new(failing_loader());
        listener.config.port = 0;
        let err = listener.accept().unwrap_err();
        assert_eq!(
            err.to_string(),
            "config error: DSA or RSA host key file must be set before accept()"
        );
    }
}
