//! Message Dispatcher: post-handshake packets become `Message` records,
//! handed to an application callback or answered with a default reply
//! (§4.E).
//!
//! Publickey signature verification lives here rather than in the
//! application: the dispatcher is the thing that holds `session_id` and the
//! raw key/signature blobs needed to rebuild the signed-data buffer, the
//! same way the reference engine verifies the signature itself before
//! handing the application a yes/no `signature_state` rather than raw bytes
//! to check itself.

use std::io::{Read, Write};

use num_bigint_dig::BigUint;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::signature::Verifier as _;
use rsa::RsaPublicKey;
use sha1::Sha1;

use crate::error::{Result, SshError};
use crate::handshake::send_packet;
use crate::message::{
    AuthMethod, AuthRequest, ChannelOpenRequest, ChannelRequest, ChannelRequestDetail, Message,
    ServiceRequest, SignatureState,
};
use crate::msgtype::*;
use crate::packet::{self, Decoded};
use crate::session::{AuthMethods, Session};
use crate::wire::{WireReader, WireWriter};

/// What an application callback wants done after seeing a message.
pub enum CallbackOutcome {
    /// The application already sent whatever reply it wanted.
    Handled,
    /// Send this core's default reply as if no callback were installed.
    WantDefaultReply,
}

pub type MessageCallback = dyn FnMut(&mut Session, &Message) -> CallbackOutcome;

/// Holds the application's message callback, if any. One instance per
/// accepted connection, used after `handle_key_exchange` returns.
#[derive(Default)]
pub struct Dispatcher {
    callback: Option<Box<MessageCallback>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { callback: None }
    }

    pub fn set_message_callback(&mut self, cb: Box<MessageCallback>) {
        self.callback = Some(cb);
    }

    /// Pump exactly one inbound packet, parse it, and either hand it to the
    /// installed callback or send the default reply.
    pub fn execute_message_callbacks(
        &mut self,
        session: &mut Session,
        stream: &mut (impl Read + Write),
    ) -> Result<()> {
        loop {
            let decoded =
                packet::try_decode(&session.input_buffer, session.current_crypto.client_to_server.as_mut());
            match decoded {
                Ok(Decoded::Packet(msg_type, payload, consumed)) => {
                    session.input_buffer.drain(..consumed);
                    let message = parse_message(msg_type, &payload, session.session_id.as_deref())?;
                    let outcome = match self.callback.as_mut() {
                        Some(cb) => cb(session, &message),
                        None => CallbackOutcome::WantDefaultReply,
                    };
                    if matches!(outcome, CallbackOutcome::WantDefaultReply) {
                        send_default_reply(session, stream, &message)?;
                    }
                    return Ok(());
                }
                Ok(Decoded::NeedMoreBytes) => {
                    let mut chunk = [0u8; 4096];
                    let n = stream.read(&mut chunk)?;
                    if n == 0 {
                        return Err(SshError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "eof waiting for a post-handshake message",
                        )));
                    }
                    session.input_buffer.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_message(msg_type: u8, payload: &[u8], session_id: Option<&[u8]>) -> Result<Message> {
    match msg_type {
        SSH_MSG_USERAUTH_REQUEST => parse_auth_request(payload, session_id).map(Message::Auth),
        SSH_MSG_SERVICE_REQUEST => parse_service_request(payload).map(Message::Service),
        SSH_MSG_CHANNEL_OPEN => parse_channel_open(payload).map(Message::ChannelOpen),
        SSH_MSG_CHANNEL_REQUEST => parse_channel_request(payload).map(Message::ChannelRequest),
        other => Err(SshError::protocol(format!(
            "unsupported post-handshake message type {other}"
        ))),
    }
}

fn parse_auth_request(payload: &[u8], session_id: Option<&[u8]>) -> Result<AuthRequest> {
    let mut r = WireReader::new(payload);
    let user = r.get_utf8_string()?;
    let service = r.get_utf8_string()?;
    let method_name = r.get_utf8_string()?;
    let method = match method_name.as_str() {
        "none" => AuthMethod::None,
        "password" => {
            let _change_password = r.get_bool()?;
            let password = r.get_utf8_string()?;
            AuthMethod::Password(password)
        }
        "publickey" => {
            let has_signature = r.get_bool()?;
            let algorithm = r.get_utf8_string()?;
            let key_blob = r.get_string_owned()?;
            let signature_state = if has_signature {
                let signature_blob = r.get_string_owned()?;
                match session_id {
                    Some(sid) => verify_publickey_signature(
                        sid,
                        &user,
                        &service,
                        &algorithm,
                        &key_blob,
                        &signature_blob,
                    ),
                    None => SignatureState::Wrong,
                }
            } else {
                SignatureState::None
            };
            AuthMethod::PublicKey {
                algorithm,
                key_blob,
                signature_state,
            }
        }
        other => AuthMethod::Other(other.to_string()),
    };
    Ok(AuthRequest { user, service, method })
}

fn parse_service_request(payload: &[u8]) -> Result<ServiceRequest> {
    let mut r = WireReader::new(payload);
    Ok(ServiceRequest {
        service_name: r.get_utf8_string()?,
    })
}

fn parse_channel_open(payload: &[u8]) -> Result<ChannelOpenRequest> {
    let mut r = WireReader::new(payload);
    let channel_type = r.get_utf8_string()?;
    let sender_channel = r.get_u32()?;
    let initial_window = r.get_u32()?;
    let max_packet = r.get_u32()?;
    let (originator_host, originator_port, destination_host, destination_port) = match channel_type.as_str() {
        "direct-tcpip" | "forwarded-tcpip" => {
            let destination_host = r.get_utf8_string()?;
            let destination_port = r.get_u32()?;
            let originator_host = r.get_utf8_string()?;
            let originator_port = r.get_u32()?;
            (
                Some(originator_host),
                Some(originator_port),
                Some(destination_host),
                Some(destination_port),
            )
        }
        _ => (None, None, None, None),
    };
    Ok(ChannelOpenRequest {
        channel_type,
        sender_channel,
        initial_window,
        max_packet,
        originator_host,
        originator_port,
        destination_host,
        destination_port,
    })
}

fn parse_channel_request(payload: &[u8]) -> Result<ChannelRequest> {
    let mut r = WireReader::new(payload);
    let channel = r.get_u32()?;
    let request_type = r.get_utf8_string()?;
    let want_reply = r.get_bool()?;
    let detail = match request_type.as_str() {
        "pty-req" => {
            let term = r.get_utf8_string()?;
            let width_chars = r.get_u32()?;
            let height_chars = r.get_u32()?;
            let width_px = r.get_u32()?;
            let height_px = r.get_u32()?;
            let modes = r.get_string_owned()?;
            ChannelRequestDetail::Pty {
                term,
                width_chars,
                height_chars,
                width_px,
                height_px,
                modes,
            }
        }
        "env" => ChannelRequestDetail::Env {
            name: r.get_utf8_string()?,
            value: r.get_utf8_string()?,
        },
        "exec" => ChannelRequestDetail::Exec(r.get_utf8_string()?),
        "subsystem" => ChannelRequestDetail::Subsystem(r.get_utf8_string()?),
        "shell" => ChannelRequestDetail::Shell,
        other => ChannelRequestDetail::Other {
            request_type: other.to_string(),
            payload: r.rest().to_vec(),
        },
    };
    Ok(ChannelRequest {
        channel,
        want_reply,
        detail,
    })
}

/// `session_id || USERAUTH_REQUEST(50) || user || service || "publickey" ||
/// TRUE || algorithm || key_blob` — the exact buffer a publickey-auth
/// signature is computed over (RFC 4252 §7).
fn build_signed_data(session_id: &[u8], user: &str, service: &str, algorithm: &str, key_blob: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_string(session_id);
    w.put_u8(SSH_MSG_USERAUTH_REQUEST);
    w.put_string(user.as_bytes());
    w.put_string(service.as_bytes());
    w.put_string(b"publickey");
    w.put_bool(true);
    w.put_string(algorithm.as_bytes());
    w.put_string(key_blob);
    w.into_bytes()
}

fn verify_publickey_signature(
    session_id: &[u8],
    user: &str,
    service: &str,
    algorithm: &str,
    key_blob: &[u8],
    signature_blob: &[u8],
) -> SignatureState {
    let signed_data = build_signed_data(session_id, user, service, algorithm, key_blob);
    let result = match algorithm {
        "ssh-ed25519" => verify_ed25519(key_blob, signature_blob, &signed_data),
        "ssh-rsa" => verify_rsa(key_blob, signature_blob, &signed_data),
        "ssh-dss" => verify_dsa(key_blob, signature_blob, &signed_data),
        _ => Ok(false),
    };
    match result {
        Ok(true) => SignatureState::Valid,
        _ => SignatureState::Wrong,
    }
}

fn verify_ed25519(key_blob: &[u8], signature_blob: &[u8], data: &[u8]) -> Result<bool> {
    let mut kr = WireReader::new(key_blob);
    let _algo = kr.get_string()?;
    let pk_bytes = kr.get_string()?;
    let pk_array: [u8; 32] = pk_bytes
        .try_into()
        .map_err(|_| SshError::crypto("ssh-ed25519 public key must be 32 bytes"))?;
    let vk = ed25519_dalek::VerifyingKey::from_bytes(&pk_array)
        .map_err(|e| SshError::crypto(format!("bad ssh-ed25519 public key: {e}")))?;

    let mut sr = WireReader::new(signature_blob);
    let _algo = sr.get_string()?;
    let sig_bytes = sr.get_string()?;
    let sig = ed25519_dalek::Signature::from_slice(sig_bytes)
        .map_err(|e| SshError::crypto(format!("bad ssh-ed25519 signature: {e}")))?;

    use ed25519_dalek::Verifier;
    Ok(vk.verify(data, &sig).is_ok())
}

fn verify_rsa(key_blob: &[u8], signature_blob: &[u8], data: &[u8]) -> Result<bool> {
    let mut kr = WireReader::new(key_blob);
    let _algo = kr.get_string()?;
    let e = kr.get_mpint()?;
    let n = kr.get_mpint()?;
    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|err| SshError::crypto(format!("bad ssh-rsa public key: {err}")))?;

    let mut sr = WireReader::new(signature_blob);
    let _algo = sr.get_string()?;
    let sig_bytes = sr.get_string()?;
    let sig = RsaSignature::try_from(sig_bytes)
        .map_err(|err| SshError::crypto(format!("bad ssh-rsa signature: {err}")))?;

    let verifying_key: RsaVerifyingKey<Sha1> = RsaVerifyingKey::new(public_key);
    Ok(verifying_key.verify(data, &sig).is_ok())
}

fn verify_dsa(key_blob: &[u8], signature_blob: &[u8], data: &[u8]) -> Result<bool> {
    let mut kr = WireReader::new(key_blob);
    let _algo = kr.get_string()?;
    let p = kr.get_mpint()?;
    let q = kr.get_mpint()?;
    let g = kr.get_mpint()?;
    let y = kr.get_mpint()?;
    let components = dsa::Components::from_components(
        BigUint::from_bytes_be(&p),
        BigUint::from_bytes_be(&q),
        BigUint::from_bytes_be(&g),
    )
    .map_err(|err| SshError::crypto(format!("bad ssh-dss parameters: {err}")))?;
    let verifying_key = dsa::VerifyingKey::from_components(components, BigUint::from_bytes_be(&y))
        .map_err(|err| SshError::crypto(format!("bad ssh-dss public key: {err}")))?;

    let mut sr = WireReader::new(signature_blob);
    let _algo = sr.get_string()?;
    let fixed = sr.get_string()?;
    if fixed.len() != 40 {
        return Err(SshError::crypto("ssh-dss signature must be 40 bytes"));
    }
    let r = BigUint::from_bytes_be(&fixed[0..20]);
    let s = BigUint::from_bytes_be(&fixed[20..40]);
    let sig = dsa::Signature::from_components(r, s)
        .map_err(|err| SshError::crypto(format!("bad ssh-dss signature: {err}")))?;

    use signature::Verifier;
    Ok(verifying_key.verify(data, &sig).is_ok())
}

fn namelist_parts(list: &str) -> Vec<&str> {
    list.split(',').filter(|s| !s.is_empty()).collect()
}

fn send_default_reply(session: &mut Session, stream: &mut impl Write, message: &Message) -> Result<()> {
    match message {
        Message::Auth(_req) => {
            let methods = session.auth_methods.to_name_list();
            let mut w = WireWriter::new();
            w.put_namelist(&namelist_parts(&methods));
            w.put_bool(false);
            send_packet(session, stream, SSH_MSG_USERAUTH_FAILURE, &w.into_bytes())
        }
        Message::Service(req) => {
            let mut w = WireWriter::new();
            w.put_string(req.service_name.as_bytes());
            send_packet(session, stream, SSH_MSG_SERVICE_ACCEPT, &w.into_bytes())
        }
        Message::ChannelOpen(req) => {
            let mut w = WireWriter::new();
            w.put_u32(req.sender_channel);
            w.put_u32(SSH_OPEN_ADMINISTRATIVELY_PROHIBITED);
            w.put_string(b"");
            w.put_string(b"");
            send_packet(session, stream, SSH_MSG_CHANNEL_OPEN_FAILURE, &w.into_bytes())
        }
        Message::ChannelRequest(req) => {
            if req.want_reply {
                let mut w = WireWriter::new();
                w.put_u32(req.channel);
                send_packet(session, stream, SSH_MSG_CHANNEL_FAILURE, &w.into_bytes())
            } else {
                Ok(())
            }
        }
    }
}

/// `auth_reply_success(partial)`: `USERAUTH_SUCCESS` if not partial,
/// otherwise `USERAUTH_FAILURE` with the partial-success flag set (§4.E).
pub fn auth_reply_success(session: &mut Session, stream: &mut impl Write, partial: bool) -> Result<()> {
    if partial {
        let methods = session.auth_methods.to_name_list();
        let mut w = WireWriter::new();
        w.put_namelist(&namelist_parts(&methods));
        w.put_bool(true);
        send_packet(session, stream, SSH_MSG_USERAUTH_FAILURE, &w.into_bytes())
    } else {
        send_packet(session, stream, SSH_MSG_USERAUTH_SUCCESS, &[])
    }
}

/// `auth_reply_pk_ok(algo, pubkey)`: used during a publickey probe, before
/// the client commits to signing (§4.E).
pub fn auth_reply_pk_ok(session: &mut Session, stream: &mut impl Write, algorithm: &str, key_blob: &[u8]) -> Result<()> {
    let mut w = WireWriter::new();
    w.put_string(algorithm.as_bytes());
    w.put_string(key_blob);
    send_packet(session, stream, SSH_MSG_USERAUTH_PK_OK, &w.into_bytes())
}

/// `auth_set_methods(mask)`: adjust advertised authentication methods.
pub fn auth_set_methods(session: &mut Session, methods: AuthMethods) {
    session.auth_methods = methods;
}
