//! Handshake Driver: the session state machine from `accept` through
//! `AUTHENTICATING` (§4.D).
//!
//! Modeled the way §9's design note asks for: each step is a function from
//! `(state, inbound packet) -> (state', outbound packets)`, with the socket
//! only ever touched inside `send_banner`/`receive_banner`/`pump_one_packet`.
//! That keeps the state machine itself exercisable against any `Read + Write`,
//! not just a live `TcpStream`.

use std::io::{Read, Write};

use rand::RngCore;

use crate::algorithms::{self, KexInit, NegotiatedAlgorithms};
use crate::crypto::{Cipher, CryptoContext, DirectionalCrypto, Mac};
use crate::error::{Result, SshError};
use crate::kex::{self, KexHash};
use crate::msgtype::*;
use crate::packet::{self, Decoded};
use crate::session::{DhHandshakeState, Session, SessionState};
use crate::wire::{WireReader, WireWriter};

const MAX_BANNER_LEN: usize = 128;
const SERVER_BANNER: &str = "SSH-2.0-AnchorSSH_0.1";

/// Drive one accepted connection from `NONE` to `AUTHENTICATING`. Returns
/// `Ok(())` only if that state is reached; any other outcome leaves
/// `session.state == Error` and the caller should close the socket.
pub fn handle_key_exchange(session: &mut Session, stream: &mut (impl Read + Write)) -> Result<()> {
    session.state = SessionState::Connecting;
    send_banner(session, stream)?;
    session.state = SessionState::SocketConnected;

    receive_banner(session, stream)?;
    negotiate_protocol_version(session)?;

    send_server_kexinit(session, stream)?;
    session.state = SessionState::InitialKex;

    while !session.is_terminal() {
        pump_one_packet(session, stream)?;
    }

    if session.state == SessionState::Authenticating {
        Ok(())
    } else {
        Err(SshError::protocol("handshake did not reach AUTHENTICATING"))
    }
}

fn send_banner(session: &mut Session, stream: &mut impl Write) -> Result<()> {
    session.server_version = SERVER_BANNER.to_string();
    let line = format!("{SERVER_BANNER}\r\n");
    stream.write_all(line.as_bytes())?;
    Ok(())
}

/// Scan bytes for `\n`, normalizing `\r` to NUL as they arrive (§4.D
/// "Banner reception"). A line longer than 128 bytes without a terminator
/// is a protocol error, not a request for more bytes — the peer is not
/// speaking SSH.
fn receive_banner(session: &mut Session, stream: &mut impl Read) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        let normalized = if byte[0] == b'\r' { 0u8 } else { byte[0] };
        session.banner_line.push(normalized);
        if session.banner_line.len() > MAX_BANNER_LEN {
            session.fail("too large banner");
            return Err(SshError::protocol("too large banner"));
        }
    }
    let trimmed: Vec<u8> = session.banner_line.iter().copied().filter(|&b| b != 0).collect();
    session.client_version = String::from_utf8(trimmed)
        .map_err(|_| SshError::protocol("banner was not valid utf-8"))?;
    session.banner_line.clear();
    session.state = SessionState::BannerReceived;
    Ok(())
}

/// Parse the banner's `SSH-x.y-...` prefix and accept only SSH-2 (or a
/// SSH-1/2 dual-capable `1.99`) peers. SSH-1 is legacy and out of scope
/// (§9): reject it outright rather than trying to speak it.
fn negotiate_protocol_version(session: &mut Session) -> Result<()> {
    let rest = match session.client_version.strip_prefix("SSH-") {
        Some(rest) => rest,
        None => {
            session.fail("banner missing SSH- prefix");
            return Err(SshError::protocol("banner missing SSH- prefix"));
        }
    };
    let proto_version = rest.split('-').next().unwrap_or("");
    if proto_version != "2.0" && proto_version != "1.99" {
        session.fail("peer does not support SSH-2");
        return Err(SshError::protocol("peer does not support SSH-2"));
    }
    Ok(())
}

fn send_server_kexinit(session: &mut Session, stream: &mut impl Write) -> Result<()> {
    let mut cookie = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut cookie);
    let kex_init = KexInit::server_offer(cookie, session.host_key_algorithms());

    let mut raw = Vec::with_capacity(1 + 256);
    raw.push(SSH_MSG_KEXINIT);
    raw.extend_from_slice(&kex_init.to_bytes());

    let wire = packet::encode_packet(&raw, session.current_crypto.server_to_client.as_mut());
    stream.write_all(&wire)?;
    session.server_to_client_seq += 1;

    session.server_kexinit_raw = Some(raw);
    session.server_kexinit = Some(kex_init);
    Ok(())
}

/// Frame and send one packet under whatever crypto is currently installed
/// for the server->client direction. Shared with the message dispatcher,
/// which sends packets the same way once past `AUTHENTICATING`.
pub(crate) fn send_packet(session: &mut Session, stream: &mut impl Write, msg_type: u8, body: &[u8]) -> Result<()> {
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(msg_type);
    payload.extend_from_slice(body);
    let wire = packet::encode_packet(&payload, session.current_crypto.server_to_client.as_mut());
    stream.write_all(&wire)?;
    session.server_to_client_seq += 1;
    Ok(())
}

/// Read bytes into `session.input_buffer` until one full packet can be
/// framed, then dispatch it. One call processes exactly one inbound packet.
fn pump_one_packet(session: &mut Session, stream: &mut (impl Read + Write)) -> Result<()> {
    loop {
        let decoded = packet::try_decode(&session.input_buffer, session.current_crypto.client_to_server.as_mut());
        match decoded {
            Ok(Decoded::Packet(msg_type, payload, consumed)) => {
                session.input_buffer.drain(..consumed);
                session.client_to_server_seq += 1;
                return handle_packet(session, msg_type, &payload, stream);
            }
            Ok(Decoded::NeedMoreBytes) => {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    session.fail("connection closed before packet complete");
                    return Err(SshError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "eof during handshake",
                    )));
                }
                session.input_buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                session.fail(e.to_string());
                return Err(e);
            }
        }
    }
}

fn handle_packet(
    session: &mut Session,
    msg_type: u8,
    payload: &[u8],
    stream: &mut (impl Read + Write),
) -> Result<()> {
    match (session.state, msg_type) {
        (SessionState::InitialKex, SSH_MSG_KEXINIT) => handle_client_kexinit(session, payload),
        (SessionState::Dh, SSH_MSG_KEXDH_INIT) if session.dh_state == DhHandshakeState::Init => {
            handle_kexdh_init(session, payload, stream)
        }
        (SessionState::Dh, SSH_MSG_NEWKEYS) if session.dh_state == DhHandshakeState::NewKeysSent => {
            handle_newkeys(session)
        }
        (state, mt) => {
            let msg = format!("packet type {mt} illegal in state {state:?}");
            session.fail(msg.clone());
            Err(SshError::protocol(msg))
        }
    }
}

fn handle_client_kexinit(session: &mut Session, payload: &[u8]) -> Result<()> {
    let mut raw = Vec::with_capacity(1 + payload.len());
    raw.push(SSH_MSG_KEXINIT);
    raw.extend_from_slice(payload);

    let client_kexinit = KexInit::parse(payload)?;
    session.state = SessionState::KexInitReceived;

    let negotiated = algorithms::negotiate(
        &client_kexinit,
        session
            .server_kexinit
            .as_ref()
            .expect("server KEXINIT sent before any client packet is processed"),
    )?;

    session.client_kexinit_raw = Some(raw);
    session.client_kexinit = Some(client_kexinit);
    session.negotiated = Some(negotiated);
    session.state = SessionState::Dh;
    session.dh_state = DhHandshakeState::Init;
    Ok(())
}

fn handle_kexdh_init(session: &mut Session, payload: &[u8], stream: &mut impl Write) -> Result<()> {
    let negotiated = session
        .negotiated
        .clone()
        .ok_or_else(|| SshError::protocol("KEXDH_INIT before algorithm negotiation"))?;

    // curve25519-sha256's Q_C/Q_S are raw 32-byte strings, not mpints
    // (draft-ietf-curdle-ssh-curves); every classic MODP suite's e/f is an
    // mpint. K itself is mpint-encoded either way.
    let is_curve25519 = negotiated.kex == "curve25519-sha256";
    let mut r = WireReader::new(payload);
    let client_public = if is_curve25519 {
        r.get_string()?.to_vec()
    } else {
        r.get_mpint()?
    };

    let exchange = kex::begin_server_exchange(&negotiated.kex)?;
    let hash_algo = exchange.hash();
    let f_bytes = exchange.server_public_bytes();

    let host_key_blob = session
        .host_key_for(&negotiated.host_key)
        .ok_or_else(|| SshError::config(format!("no host key loaded for {}", negotiated.host_key)))?
        .public_key_blob();

    let k_bytes = exchange.compute_shared_secret(&client_public)?;

    let exchange_hash = compute_exchange_hash(
        hash_algo,
        &session.client_version,
        &session.server_version,
        session
            .client_kexinit_raw
            .as_ref()
            .expect("client KEXINIT stored before KEXDH_INIT is accepted"),
        session
            .server_kexinit_raw
            .as_ref()
            .expect("server KEXINIT sent before KEXDH_INIT is accepted"),
        &host_key_blob,
        &client_public,
        &f_bytes,
        &k_bytes,
        is_curve25519,
    );

    if session.session_id.is_none() {
        session.session_id = Some(exchange_hash.clone());
    }

    let signature_blob = session
        .host_key_for(&negotiated.host_key)
        .expect("checked above")
        .sign(&exchange_hash)?;

    let mut reply = WireWriter::new();
    reply.put_string(&host_key_blob);
    if is_curve25519 {
        reply.put_string(&f_bytes);
    } else {
        reply.put_mpint(&f_bytes);
    }
    reply.put_string(&signature_blob);
    send_packet(session, stream, SSH_MSG_KEXDH_REPLY, &reply.into_bytes())?;

    // Host keys are unreachable from this point on (§3 invariant, §4.D
    // step 8): both are erased, not just the one that signed.
    session.erase_host_keys();

    install_next_crypto(session, hash_algo, &k_bytes, &exchange_hash, &negotiated)?;

    send_packet(session, stream, SSH_MSG_NEWKEYS, &[])?;
    // Each direction's new keys take effect as soon as that direction's own
    // NEWKEYS is sent or received, independently (RFC 4253 §7.3). The
    // sequence number carries over from the cleartext phase rather than
    // restarting at zero: `server_to_client_seq` now counts KEXINIT,
    // KEXDH_REPLY, and the NEWKEYS just sent.
    let mut server_to_client = session
        .next_crypto
        .server_to_client
        .take()
        .expect("installed above");
    server_to_client.seq = session.server_to_client_seq;
    session.current_crypto.server_to_client = Some(server_to_client);
    session.dh_state = DhHandshakeState::NewKeysSent;
    Ok(())
}

fn handle_newkeys(session: &mut Session) -> Result<()> {
    // `client_to_server_seq` already counts the client's KEXINIT,
    // KEXDH_INIT, and the NEWKEYS that triggered this call.
    let mut client_to_server = session
        .next_crypto
        .client_to_server
        .take()
        .expect("installed at KEXDH_INIT");
    client_to_server.seq = session.client_to_server_seq;
    session.current_crypto.client_to_server = Some(client_to_server);
    session.dh_state = DhHandshakeState::Finished;
    session.state = SessionState::Authenticating;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compute_exchange_hash(
    hash: KexHash,
    client_version: &str,
    server_version: &str,
    i_c: &[u8],
    i_s: &[u8],
    host_key_blob: &[u8],
    e: &[u8],
    f: &[u8],
    k: &[u8],
    is_curve25519: bool,
) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_string(client_version.as_bytes());
    w.put_string(server_version.as_bytes());
    w.put_string(i_c);
    w.put_string(i_s);
    w.put_string(host_key_blob);
    // curve25519-sha256 hashes Q_C/Q_S as raw strings, not mpints; the
    // classic MODP suites hash e/f as mpints. K is always an mpint.
    if is_curve25519 {
        w.put_string(e);
        w.put_string(f);
    } else {
        w.put_mpint(e);
        w.put_mpint(f);
    }
    w.put_mpint(k);
    hash.digest(&w.into_bytes())
}

/// Six-key expansion for NEWKEYS (§4.D "NEWKEYS reception"). Each direction
/// derives its own iv/key/mac sizes from its own negotiated algorithm,
/// rather than assuming both directions agreed on the same cipher.
///
/// Built with `initial_seq: 0` as a placeholder on both directions: the
/// true starting sequence number (the count of cleartext packets already
/// exchanged in that direction) isn't known for `client_to_server` until
/// this connection's own NEWKEYS is actually received, so
/// `handle_kexdh_init`/`handle_newkeys` fix `seq` up at the moment each
/// direction is swapped into `current_crypto`.
fn install_next_crypto(
    session: &mut Session,
    hash: KexHash,
    k: &[u8],
    h: &[u8],
    negotiated: &NegotiatedAlgorithms,
) -> Result<()> {
    let session_id = session
        .session_id
        .clone()
        .expect("session_id is set before key derivation runs");

    let sizes = kex::DirectionSizes {
        iv_client_to_server: Cipher::iv_size(&negotiated.cipher_client_to_server)?,
        iv_server_to_client: Cipher::iv_size(&negotiated.cipher_server_to_client)?,
        key_client_to_server: Cipher::key_size(&negotiated.cipher_client_to_server)?,
        key_server_to_client: Cipher::key_size(&negotiated.cipher_server_to_client)?,
        mac_client_to_server: Mac::key_size(&negotiated.mac_client_to_server)?,
        mac_server_to_client: Mac::key_size(&negotiated.mac_server_to_client)?,
    };
    let keys = kex::derive_all(hash, k, h, &session_id, &sizes);

    let client_to_server = DirectionalCrypto::new(
        &negotiated.cipher_client_to_server,
        &negotiated.mac_client_to_server,
        &keys.key_client_to_server,
        &keys.iv_client_to_server,
        &keys.mac_key_client_to_server,
        0,
    )?;
    let server_to_client = DirectionalCrypto::new(
        &negotiated.cipher_server_to_client,
        &negotiated.mac_server_to_client,
        &keys.key_server_to_client,
        &keys.iv_server_to_client,
        &keys.mac_key_server_to_client,
        0,
    )?;

    session.next_crypto = CryptoContext {
        client_to_server: Some(client_to_server),
        server_to_client: Some(server_to_client),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostkey::HostKey;
    use std::collections::VecDeque;

    struct ScriptedStream {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn banner_over_128_bytes_transitions_to_error() {
        let mut session = Session::new(Vec::new());
        let mut long_line = vec![b'x'; MAX_BANNER_LEN + 2];
        long_line.push(b'\n');
        let mut stream = ScriptedStream {
            inbound: long_line.into(),
            outbound: Vec::new(),
        };
        let err = receive_banner(&mut session, &mut stream).unwrap_err();
        assert_eq!(session.state, SessionState::Error);
        assert!(err.to_string().contains("too large banner"));
    }

    #[test]
    fn banner_without_ssh2_prefix_is_rejected() {
        let mut session = Session::new(Vec::new());
        session.client_version = "SSH-1.5-OldClient".to_string();
        let err = negotiate_protocol_version(&mut session).unwrap_err();
        assert_eq!(session.state, SessionState::Error);
        assert!(err.to_string().contains("SSH-2"));
    }

    #[test]
    fn kexdh_init_before_negotiation_is_rejected() {
        let mut session = Session::new(Vec::new());
        session.state = SessionState::InitialKex;
        let mut stream = ScriptedStream {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        };
        let payload = vec![];
        let err = handle_packet(&mut session, SSH_MSG_KEXDH_INIT, &payload, &mut stream).unwrap_err();
        assert_eq!(session.state, SessionState::Error);
        assert!(err.to_string().contains("illegal in state"));
    }

    /// End-to-end scenario from §8: a scripted client offering
    /// `diffie-hellman-group1-sha1` reaches `AUTHENTICATING` with both
    /// crypto directions installed and the host key erased.
    #[test]
    fn minimal_group1_handshake_reaches_authenticating() {
        let _ = env_logger::try_init();

        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;

        let host_key = HostKey::Ed25519(SigningKey::generate(&mut OsRng));
        let mut session = Session::new(vec![host_key]);

        let client_dh = kex::begin_server_exchange("diffie-hellman-group1-sha1").unwrap();
        let client_e = client_dh.server_public_bytes();

        let client_kex = KexInit {
            cookie: [9u8; 16],
            kex_algorithms: vec!["diffie-hellman-group1-sha1".to_string()],
            server_host_key_algorithms: vec!["ssh-ed25519".to_string()],
            encryption_client_to_server: vec!["aes128-ctr".to_string()],
            encryption_server_to_client: vec!["aes128-ctr".to_string()],
            mac_client_to_server: vec!["hmac-sha2-256".to_string()],
            mac_server_to_client: vec!["hmac-sha2-256".to_string()],
            compression_client_to_server: vec!["none".to_string()],
            compression_server_to_client: vec!["none".to_string()],
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        };
        let mut kexinit_payload = vec![SSH_MSG_KEXINIT];
        kexinit_payload.extend_from_slice(&client_kex.to_bytes());
        let kexinit_wire = packet::encode_packet(&kexinit_payload, None);

        let mut kexdh_init_payload = vec![SSH_MSG_KEXDH_INIT];
        let mut w = WireWriter::new();
        w.put_mpint(&client_e);
        kexdh_init_payload.extend_from_slice(&w.into_bytes());
        let kexdh_init_wire = packet::encode_packet(&kexdh_init_payload, None);

        let newkeys_wire = packet::encode_packet(&[SSH_MSG_NEWKEYS], None);

        let mut inbound = Vec::new();
        inbound.extend_from_slice(b"SSH-2.0-TestClient\r\n");
        inbound.extend_from_slice(&kexinit_wire);
        inbound.extend_from_slice(&kexdh_init_wire);
        inbound.extend_from_slice(&newkeys_wire);

        let mut stream = ScriptedStream {
            inbound: inbound.into(),
            outbound: Vec::new(),
        };

        handle_key_exchange(&mut session, &mut stream).unwrap();

        assert_eq!(session.state, SessionState::Authenticating);
        assert_eq!(session.dh_state, DhHandshakeState::Finished);
        assert!(session.current_crypto.is_installed());
        assert!(session.host_keys.is_empty());
        assert!(session.session_id.is_some());
        // KEXINIT, KEXDH_INIT/REPLY, NEWKEYS: 3 cleartext packets per
        // direction before the sequence carries over into encrypted traffic.
        assert_eq!(session.current_crypto.server_to_client.as_ref().unwrap().seq, 3);
        assert_eq!(session.current_crypto.client_to_server.as_ref().unwrap().seq, 3);
    }

    /// Same end-to-end scenario but with `curve25519-sha256`, whose
    /// client public value is a raw 32-byte string rather than an mpint —
    /// regression coverage for the e/f wire-encoding branch.
    #[test]
    fn minimal_curve25519_handshake_reaches_authenticating() {
        let _ = env_logger::try_init();

        use ed25519_dalek::SigningKey;
        use rand::rngs::OsRng;

        let host_key = HostKey::Ed25519(SigningKey::generate(&mut OsRng));
        let mut session = Session::new(vec![host_key]);

        let client_dh = kex::begin_server_exchange("curve25519-sha256").unwrap();
        let client_public = client_dh.server_public_bytes();
        assert_eq!(client_public.len(), 32);

        let client_kex = KexInit {
            cookie: [7u8; 16],
            kex_algorithms: vec!["curve25519-sha256".to_string()],
            server_host_key_algorithms: vec!["ssh-ed25519".to_string()],
            encryption_client_to_server: vec!["aes128-ctr".to_string()],
            encryption_server_to_client: vec!["aes128-ctr".to_string()],
            mac_client_to_server: vec!["hmac-sha2-256".to_string()],
            mac_server_to_client: vec!["hmac-sha2-256".to_string()],
            compression_client_to_server: vec!["none".to_string()],
            compression_server_to_client: vec!["none".to_string()],
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        };
        let mut kexinit_payload = vec![SSH_MSG_KEXINIT];
        kexinit_payload.extend_from_slice(&client_kex.to_bytes());
        let kexinit_wire = packet::encode_packet(&kexinit_payload, None);

        let mut kexdh_init_payload = vec![SSH_MSG_KEXDH_INIT];
        let mut w = WireWriter::new();
        w.put_string(&client_public);
        kexdh_init_payload.extend_from_slice(&w.into_bytes());
        let kexdh_init_wire = packet::encode_packet(&kexdh_init_payload, None);

        let newkeys_wire = packet::encode_packet(&[SSH_MSG_NEWKEYS], None);

        let mut inbound = Vec::new();
        inbound.extend_from_slice(b"SSH-2.0-TestClient\r\n");
        inbound.extend_from_slice(&kexinit_wire);
        inbound.extend_from_slice(&kexdh_init_wire);
        inbound.extend_from_slice(&newkeys_wire);

        let mut stream = ScriptedStream {
            inbound: inbound.into(),
            outbound: Vec::new(),
        };

        handle_key_exchange(&mut session, &mut stream).unwrap();

        assert_eq!(session.state, SessionState::Authenticating);
        assert_eq!(session.dh_state, DhHandshakeState::Finished);
        assert!(session.current_crypto.is_installed());
        assert!(session.session_id.is_some());
    }
}
