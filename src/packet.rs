//! Packet Framer: wrap/unwrap SSH Binary Packet Protocol records.
//!
//! `packet_length (u32) | padding_length (u8) | payload | padding | MAC`.
//! Before NEWKEYS there is no encryption and no MAC; afterwards every
//! packet is encrypted and MACed under the installed `DirectionalCrypto`
//! with a sequence number that increments per packet and never resets.

use crate::crypto::DirectionalCrypto;
use crate::error::{Result, SshError};

/// Maximum accepted `packet_length`, per §4.B / the boundary test in §8.
pub const MAX_PACKET_LENGTH: u32 = 35_000;

const UNENCRYPTED_BLOCK_SIZE: usize = 8;

/// Serialize one packet for the wire. If `crypto` is `Some`, the packet is
/// encrypted and a MAC is appended; otherwise it is sent in the clear with
/// 8-byte block alignment.
pub fn encode_packet(payload: &[u8], crypto: Option<&mut DirectionalCrypto>) -> Vec<u8> {
    match crypto {
        None => encode_unencrypted(payload),
        Some(dc) => encode_encrypted(payload, dc),
    }
}

fn padding_len_for(payload_len: usize, block_size: usize) -> usize {
    // total = 4 (length) + 1 (padding_length) + payload + padding must be a
    // multiple of block_size, with padding >= 4.
    let mut padding_len = block_size - ((4 + 1 + payload_len) % block_size);
    if padding_len < 4 {
        padding_len += block_size;
    }
    padding_len
}

fn encode_unencrypted(payload: &[u8]) -> Vec<u8> {
    let padding_len = padding_len_for(payload.len(), UNENCRYPTED_BLOCK_SIZE);
    let packet_len = 1 + payload.len() + padding_len;
    let mut out = Vec::with_capacity(4 + packet_len);
    out.extend_from_slice(&(packet_len as u32).to_be_bytes());
    out.push(padding_len as u8);
    out.extend_from_slice(payload);
    out.resize(out.len() + padding_len, 0);
    out
}

fn encode_encrypted(payload: &[u8], dc: &mut DirectionalCrypto) -> Vec<u8> {
    let block_size = dc.cipher.block_size_hint().max(UNENCRYPTED_BLOCK_SIZE);
    let padding_len = padding_len_for(payload.len(), block_size);
    let packet_len = 1 + payload.len() + padding_len;
    let mac_size = dc.mac.output_size();

    let mut packet = Vec::with_capacity(4 + packet_len + mac_size);
    packet.extend_from_slice(&(packet_len as u32).to_be_bytes());
    packet.push(padding_len as u8);
    packet.extend_from_slice(payload);
    let pad_start = packet.len();
    packet.resize(pad_start + padding_len, 0);
    fill_random(&mut packet[pad_start..]);

    let seq = dc.next_seq();
    let mac = dc.mac.compute(seq, &packet);

    dc.cipher.apply(&mut packet);
    packet.extend_from_slice(&mac);
    packet
}

fn fill_random(dest: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(dest);
}

/// Result of attempting to decode one packet from the front of a buffer.
pub enum Decoded {
    /// Not enough bytes buffered yet; caller should read more from the
    /// socket and retry.
    NeedMoreBytes,
    /// One full packet consumed: `(message_type, payload, bytes_consumed)`.
    Packet(u8, Vec<u8>, usize),
}

/// Try to decode exactly one packet from the front of `buf`. Never mutates
/// `buf` itself (callers drain `bytes_consumed` from the front once they
/// are ready to move on) so a partial packet can be retried as more bytes
/// arrive, matching the "reads exactly one packet or yields need more
/// bytes" contract of §4.B.
pub fn try_decode(buf: &[u8], crypto: Option<&mut DirectionalCrypto>) -> Result<Decoded> {
    match crypto {
        None => try_decode_unencrypted(buf),
        Some(dc) => try_decode_encrypted(buf, dc),
    }
}

fn try_decode_unencrypted(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < 4 {
        return Ok(Decoded::NeedMoreBytes);
    }
    let packet_len = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    validate_packet_length(packet_len)?;
    let total = 4 + packet_len as usize;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreBytes);
    }
    let padding_len = buf[4] as usize;
    validate_padding(padding_len, packet_len as usize)?;
    if total % UNENCRYPTED_BLOCK_SIZE != 0 {
        return Err(SshError::protocol("unencrypted packet not block-aligned"));
    }
    let payload_len = packet_len as usize - padding_len - 1;
    let payload_start = 5;
    let payload_end = payload_start + payload_len;
    if payload_end > buf.len() {
        return Err(SshError::protocol("payload length exceeds packet"));
    }
    let msg_type = buf[payload_start];
    let payload = buf[payload_start + 1..payload_end].to_vec();
    Ok(Decoded::Packet(msg_type, payload, total))
}

fn try_decode_encrypted(buf: &[u8], dc: &mut DirectionalCrypto) -> Result<Decoded> {
    let block_size = dc.cipher.block_size_hint().max(UNENCRYPTED_BLOCK_SIZE);
    if buf.len() < block_size {
        return Ok(Decoded::NeedMoreBytes);
    }
    // Peek the length field by decrypting a throwaway copy of the cipher
    // state, so a partial read never advances the real keystream.
    let mut peek_cipher = dc.cipher.clone();
    let mut len_block = buf[..4].to_vec();
    peek_cipher.apply(&mut len_block);
    let packet_len = u32::from_be_bytes(len_block[0..4].try_into().unwrap());
    validate_packet_length(packet_len)?;

    let mac_size = dc.mac.output_size();
    let total = 4 + packet_len as usize + mac_size;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreBytes);
    }
    if (total - mac_size) % block_size != 0 {
        return Err(SshError::protocol("encrypted packet not block-aligned"));
    }

    let mut packet = buf[..4 + packet_len as usize].to_vec();
    let tag = &buf[4 + packet_len as usize..total];

    let seq = dc.seq;
    // MAC is computed over the *unencrypted* packet at send time, so it
    // must be verified after decrypting, not before.
    dc.cipher.apply(&mut packet);

    if !dc.mac.verify(seq, &packet, tag) {
        return Err(SshError::protocol("MAC verification failed"));
    }
    dc.next_seq();

    let padding_len = packet[4] as usize;
    validate_padding(padding_len, packet_len as usize)?;
    let payload_len = packet_len as usize - padding_len - 1;
    let payload_start = 5;
    let payload_end = payload_start + payload_len;
    if payload_end > packet.len() {
        return Err(SshError::protocol("payload length exceeds packet"));
    }
    let msg_type = packet[payload_start];
    let payload = packet[payload_start + 1..payload_end].to_vec();
    Ok(Decoded::Packet(msg_type, payload, total))
}

fn validate_packet_length(packet_len: u32) -> Result<()> {
    if packet_len > MAX_PACKET_LENGTH {
        return Err(SshError::protocol(format!(
            "packet_length {packet_len} exceeds maximum {MAX_PACKET_LENGTH}"
        )));
    }
    if packet_len < 1 {
        return Err(SshError::protocol("packet_length too small"));
    }
    Ok(())
}

fn validate_padding(padding_len: usize, packet_len: usize) -> Result<()> {
    if padding_len < 4 {
        return Err(SshError::protocol("padding_length below minimum of 4"));
    }
    if padding_len + 1 > packet_len {
        return Err(SshError::protocol("padding_length exceeds packet_length"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unencrypted_round_trips() {
        let payload = vec![20u8, 1, 2, 3, 4, 5];
        let wire = encode_packet(&payload, None);
        match try_decode(&wire, None).unwrap() {
            Decoded::Packet(msg_type, p, consumed) => {
                assert_eq!(msg_type, 20);
                assert_eq!(p, vec![1, 2, 3, 4, 5]);
                assert_eq!(consumed, wire.len());
            }
            Decoded::NeedMoreBytes => panic!("expected a full packet"),
        }
    }

    #[test]
    fn unencrypted_partial_length_needs_more_bytes() {
        let payload = vec![20u8, 1, 2, 3];
        let wire = encode_packet(&payload, None);
        assert!(matches!(try_decode(&wire[..2], None).unwrap(), Decoded::NeedMoreBytes));
    }

    #[test]
    fn unencrypted_partial_payload_needs_more_bytes() {
        let payload = vec![20u8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let wire = encode_packet(&payload, None);
        assert!(matches!(
            try_decode(&wire[..wire.len() - 2], None).unwrap(),
            Decoded::NeedMoreBytes
        ));
    }

    #[test]
    fn unencrypted_misaligned_packet_is_rejected() {
        // packet_length = 10: total (4 + 10 = 14) is not a multiple of 8.
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 10]);
        assert!(try_decode(&buf, None).is_err());
    }

    #[test]
    fn encrypted_misaligned_packet_is_rejected() {
        // "none" cipher leaves the length field readable in the clear, so
        // the same packet_length = 10 misalignment surfaces post-decrypt.
        let mut rx = DirectionalCrypto::new("none", "hmac-sha2-256", &[], &[], &[0x30u8; 32], 0).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 10]);
        buf.extend_from_slice(&[0u8; 32]); // dummy MAC, never reached
        assert!(try_decode(&buf, Some(&mut rx)).is_err());
    }

    #[test]
    fn oversized_packet_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_PACKET_LENGTH + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        assert!(try_decode(&buf, None).is_err());
    }

    #[test]
    fn at_max_packet_length_is_accepted_for_length_check() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAX_PACKET_LENGTH.to_be_bytes());
        // not enough bytes to complete the packet, but the length field
        // itself must pass validation rather than erroring early.
        assert!(matches!(try_decode(&buf, None).unwrap(), Decoded::NeedMoreBytes));
    }

    #[test]
    fn encrypted_round_trips_and_advances_sequence() {
        let key = [0x10u8; 16];
        let iv = [0x20u8; 16];
        let mac_key = [0x30u8; 32];
        let mut tx = DirectionalCrypto::new("aes128-ctr", "hmac-sha2-256", &key, &iv, &mac_key, 0).unwrap();
        let mut rx = DirectionalCrypto::new("aes128-ctr", "hmac-sha2-256", &key, &iv, &mac_key, 0).unwrap();

        let payload1 = vec![21u8];
        let wire1 = encode_packet(&payload1, Some(&mut tx));
        let payload2 = vec![5u8, 9, 9];
        let wire2 = encode_packet(&payload2, Some(&mut tx));

        let mut buf = wire1.clone();
        buf.extend_from_slice(&wire2);

        match try_decode(&buf, Some(&mut rx)).unwrap() {
            Decoded::Packet(mt, p, consumed) => {
                assert_eq!(mt, 21);
                assert_eq!(p, Vec::<u8>::new());
                assert_eq!(rx.seq, 1);
                buf.drain(..consumed);
            }
            Decoded::NeedMoreBytes => panic!("expected packet 1"),
        }

        match try_decode(&buf, Some(&mut rx)).unwrap() {
            Decoded::Packet(mt, p, _) => {
                assert_eq!(mt, 5);
                assert_eq!(p, vec![9, 9]);
                assert_eq!(rx.seq, 2);
            }
            Decoded::NeedMoreBytes => panic!("expected packet 2"),
        }
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let key = [0x10u8; 16];
        let iv = [0x20u8; 16];
        let mac_key = [0x30u8; 32];
        let mut tx = DirectionalCrypto::new("aes128-ctr", "hmac-sha2-256", &key, &iv, &mac_key, 0).unwrap();
        let mut rx = DirectionalCrypto::new("aes128-ctr", "hmac-sha2-256", &key, &iv, &mac_key, 0).unwrap();

        let mut wire = encode_packet(&[21u8], Some(&mut tx));
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(try_decode(&wire, Some(&mut rx)).is_err());
    }
}
