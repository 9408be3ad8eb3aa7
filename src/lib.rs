//! Server-side SSH-2 connection establishment: version and algorithm
//! negotiation, Diffie-Hellman key exchange, session-key installation, and a
//! post-handshake message dispatcher exposing USERAUTH/SERVICE/CHANNEL
//! requests to the embedding application.
//!
//! The socket/poll layer, raw crypto primitives, private-key file parsing,
//! and channel data plumbing after a channel opens are all out of scope —
//! this crate drives a [`Session`] from an already-accepted stream through
//! [`handshake::handle_key_exchange`] and then through
//! [`dispatch::Dispatcher`].

pub mod algorithms;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod hostkey;
pub mod kex;
pub mod listener;
pub mod message;
pub mod msgtype;
pub mod packet;
pub mod session;
pub mod wire;

pub use dispatch::{auth_reply_pk_ok, auth_reply_success, auth_set_methods, CallbackOutcome, Dispatcher, MessageCallback};
pub use error::{Result, SshError};
pub use handshake::handle_key_exchange;
pub use hostkey::{HostKey, HostKeyKind};
pub use listener::{KeyLoader, Listener, ListenerConfig};
pub use message::{
    AuthMethod, AuthRequest, ChannelOpenRequest, ChannelRequest, ChannelRequestDetail, Message,
    ServiceRequest, SignatureState,
};
pub use session::{AuthMethods, DhHandshakeState, Session, SessionState};
