//! The central per-connection record (§3 Data Model).

use crate::algorithms::{KexInit, NegotiatedAlgorithms};
use crate::crypto::CryptoContext;
use crate::hostkey::HostKey;

/// `session_state`: the top-level handshake state machine (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Connecting,
    SocketConnected,
    BannerReceived,
    InitialKex,
    KexInitReceived,
    Dh,
    Authenticating,
    Disconnected,
    Error,
}

/// `dh_handshake_state`: sub-states within `SessionState::Dh` (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhHandshakeState {
    Init,
    InitSent,
    NewKeysSent,
    Finished,
}

/// Advertised authentication methods bitmask. Default matches §4.E's
/// default reply: `publickey | password`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMethods(u8);

impl AuthMethods {
    pub const PUBLICKEY: AuthMethods = AuthMethods(0b01);
    pub const PASSWORD: AuthMethods = AuthMethods(0b10);

    pub fn none() -> Self {
        AuthMethods(0)
    }

    pub fn contains(self, other: AuthMethods) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: AuthMethods) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AuthMethods) {
        self.0 &= !other.0;
    }

    /// Comma-separated method-name list, no trailing comma, in a fixed
    /// order — used to build the default `USERAUTH_FAILURE` reply (§8).
    pub fn to_name_list(self) -> String {
        let mut names = Vec::new();
        if self.contains(AuthMethods::PUBLICKEY) {
            names.push("publickey");
        }
        if self.contains(AuthMethods::PASSWORD) {
            names.push("password");
        }
        names.join(",")
    }
}

impl Default for AuthMethods {
    fn default() -> Self {
        let mut m = AuthMethods::none();
        m.insert(AuthMethods::PUBLICKEY);
        m.insert(AuthMethods::PASSWORD);
        m
    }
}

/// One peer. Created by [`crate::listener::Listener::accept`], mutated
/// only by the handshake driver or dispatcher on the thread that owns it
/// (§5 Concurrency model — no internal locking here by design).
pub struct Session {
    pub state: SessionState,
    pub dh_state: DhHandshakeState,

    pub client_version: String,
    pub server_version: String,

    /// Raw KEXINIT payloads (`I_C`, `I_S`), retained verbatim until the
    /// exchange hash is computed (§3 invariant), then cleared.
    pub client_kexinit_raw: Option<Vec<u8>>,
    pub server_kexinit_raw: Option<Vec<u8>>,
    pub client_kexinit: Option<KexInit>,
    pub server_kexinit: Option<KexInit>,
    pub negotiated: Option<NegotiatedAlgorithms>,

    /// The first exchange hash computed on this connection; reused as the
    /// session identifier for key derivation and publickey-auth signed
    /// data (§3, §4.D step 5).
    pub session_id: Option<Vec<u8>>,

    pub current_crypto: CryptoContext,
    pub next_crypto: CryptoContext,

    /// Count of packets sent/received so far in each direction, including
    /// the cleartext KEXINIT/KEXDH_INIT/KEXDH_REPLY/NEWKEYS packets.
    /// Sequence numbers are per-connection, not per-crypto-installation
    /// (§4.B), so this is what seeds `DirectionalCrypto::seq` the moment
    /// each direction's NEWKEYS takes effect.
    pub server_to_client_seq: u32,
    pub client_to_server_seq: u32,

    pub input_buffer: Vec<u8>,
    pub output_buffer: Vec<u8>,

    /// Host private keys, erased immediately after signing the exchange
    /// hash (§3 invariant, §4.D step 8).
    pub host_keys: Vec<HostKey>,

    pub auth_methods: AuthMethods,

    pub last_error: Option<String>,

    /// A line accumulator for the pre-framer banner scan (§4.D "Banner
    /// reception").
    pub banner_line: Vec<u8>,
}

impl Session {
    pub fn new(host_keys: Vec<HostKey>) -> Self {
        Self {
            state: SessionState::None,
            dh_state: DhHandshakeState::Init,
            client_version: String::new(),
            server_version: String::new(),
            client_kexinit_raw: None,
            server_kexinit_raw: None,
            client_kexinit: None,
            server_kexinit: None,
            negotiated: None,
            session_id: None,
            current_crypto: CryptoContext::none(),
            next_crypto: CryptoContext::none(),
            server_to_client_seq: 0,
            client_to_server_seq: 0,
            input_buffer: Vec::new(),
            output_buffer: Vec::new(),
            host_keys,
            auth_methods: AuthMethods::default(),
            last_error: None,
            banner_line: Vec::new(),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.state = SessionState::Error;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SessionState::Error | SessionState::Authenticating | SessionState::Disconnected
        )
    }

    /// Host key matching a negotiated `server-host-key` algorithm name.
    pub fn host_key_for(&self, algorithm: &str) -> Option<&HostKey> {
        self.host_keys.iter().find(|k| k.algorithm_name() == algorithm)
    }

    /// Zero and drop every host private key. Called immediately after
    /// `KEXDH_REPLY` is sent (§4.D step 8, §3 invariant): the source frees
    /// *both* DSA and RSA keys at once, not just the one that signed, so
    /// this does the same rather than keeping the unused one around.
    pub fn erase_host_keys(&mut self) {
        for key in self.host_keys.iter_mut() {
            key.erase();
        }
        self.host_keys.clear();
    }

    /// Host-key algorithm names available, in §4.D's preference order
    /// (`ssh-ed25519`, then `ssh-dss`, then `ssh-rsa` — here extended
    /// beyond the original's DSA/RSA-only pair with the modern default
    /// first).
    pub fn host_key_algorithms(&self) -> Vec<String> {
        use crate::hostkey::HostKeyKind;
        let order = [HostKeyKind::Ed25519, HostKeyKind::Dsa, HostKeyKind::Rsa];
        order
            .iter()
            .filter(|kind| self.host_keys.iter().any(|k| k.kind() == **kind))
            .map(|kind| kind.algorithm_name().to_string())
            .collect()
    }
}
