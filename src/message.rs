//! Message records the dispatcher produces from post-handshake packets
//! (§3 Data Model, §4.E).

/// Outcome of verifying a publickey-auth signature, or its absence when
/// the client is only probing whether a key would be acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    /// `has_signature` was false: the client is asking "would you accept
    /// this key", no signature to check yet.
    None,
    Valid,
    Wrong,
}

#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `method == "none"`, used by clients to enumerate what's allowed.
    None,
    Password(String),
    PublicKey {
        algorithm: String,
        key_blob: Vec<u8>,
        signature_state: SignatureState,
    },
    /// Any method name this core doesn't implement verification for
    /// (e.g. `keyboard-interactive`, `gssapi-with-mic`) — advertised
    /// support and policy decisions are the application's (§1 Non-goals).
    Other(String),
}

#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub user: String,
    pub service: String,
    pub method: AuthMethod,
}

#[derive(Debug, Clone)]
pub struct ChannelOpenRequest {
    pub channel_type: String,
    pub sender_channel: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    /// Present for `direct-tcpip`/`forwarded-tcpip` channel types.
    pub originator_host: Option<String>,
    pub originator_port: Option<u32>,
    pub destination_host: Option<String>,
    pub destination_port: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum ChannelRequestDetail {
    Pty {
        term: String,
        width_chars: u32,
        height_chars: u32,
        width_px: u32,
        height_px: u32,
        modes: Vec<u8>,
    },
    Env {
        name: String,
        value: String,
    },
    Exec(String),
    Subsystem(String),
    Shell,
    /// Request types outside this core's vocabulary; channel data
    /// plumbing is out of scope (§1) so these are forwarded verbatim.
    Other {
        request_type: String,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub channel: u32,
    pub want_reply: bool,
    pub detail: ChannelRequestDetail,
}

#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub service_name: String,
}

/// A tagged record produced by the dispatcher (§3 `Message`).
#[derive(Debug, Clone)]
pub enum Message {
    Auth(AuthRequest),
    ChannelOpen(ChannelOpenRequest),
    ChannelRequest(ChannelRequest),
    Service(ServiceRequest),
}
