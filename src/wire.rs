//! Wire Buffer: append/parse length-prefixed primitives.
//!
//! An append-only write buffer and a random-access read cursor over a byte
//! array. Read and write positions are monotonic; `WireReader::new` and
//! `WireWriter::new` are the only ways to reset them.

use crate::error::{Result, SshError};

/// Append-only output buffer for the primitives the transport needs:
/// bytes, `u8`, `u32` big-endian, SSH "string" (length-prefixed), name-list
/// (comma-joined string), and `mpint`.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// SSH "string": u32 length prefix followed by raw bytes.
    pub fn put_string(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Name-list: comma-joined strings written as a single SSH string.
    pub fn put_namelist(&mut self, names: &[&str]) {
        self.put_string(names.join(",").as_bytes());
    }

    /// mpint: big-endian two's-complement, minimal leading-zero rule for
    /// positive values whose high bit is set; zero encodes as an empty
    /// string.
    pub fn put_mpint(&mut self, magnitude_be: &[u8]) {
        let trimmed = leading_zero_trim(magnitude_be);
        if trimmed.is_empty() {
            self.put_u32(0);
            return;
        }
        if trimmed[0] & 0x80 != 0 {
            self.put_u32((trimmed.len() + 1) as u32);
            self.buf.push(0);
        } else {
            self.put_u32(trimmed.len() as u32);
        }
        self.buf.extend_from_slice(trimmed);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Strip leading zero bytes so `put_mpint` can re-apply the minimal-encoding
/// rule regardless of how the caller produced the magnitude.
fn leading_zero_trim(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(i) => &bytes[i..],
        None => &[],
    }
}

/// Random-access read cursor. Every accessor fails with `ProtocolError` if
/// the remaining bytes are insufficient, rather than panicking.
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(SshError::protocol("unexpected end of packet reading u8"));
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(SshError::protocol("unexpected end of packet reading u32"));
        }
        let v = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SshError::protocol("unexpected end of packet reading raw bytes"));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_string(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.get_raw(len)
    }

    pub fn get_string_owned(&mut self) -> Result<Vec<u8>> {
        Ok(self.get_string()?.to_vec())
    }

    pub fn get_utf8_string(&mut self) -> Result<String> {
        let bytes = self.get_string()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SshError::protocol("string field was not valid utf-8"))
    }

    /// Name-list: a string field split on commas, empty entries dropped.
    pub fn get_namelist(&mut self) -> Result<Vec<String>> {
        let s = self.get_utf8_string()?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        Ok(s.split(',').map(|s| s.to_string()).collect())
    }

    /// mpint magnitude as big-endian bytes (sign assumed non-negative, as
    /// used throughout the transport for DH publics and shared secrets).
    pub fn get_mpint(&mut self) -> Result<Vec<u8>> {
        let bytes = self.get_string()?;
        Ok(leading_zero_trim(bytes).to_vec())
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpint_zero_is_empty() {
        let mut w = WireWriter::new();
        w.put_mpint(&[]);
        assert_eq!(w.into_bytes(), 0u32.to_be_bytes().to_vec());
    }

    #[test]
    fn mpint_high_bit_gets_leading_zero() {
        let mut w = WireWriter::new();
        w.put_mpint(&[0x80, 0x01]);
        let bytes = w.into_bytes();
        // length = 3 (one padding zero + two magnitude bytes)
        assert_eq!(&bytes[0..4], &3u32.to_be_bytes());
        assert_eq!(&bytes[4..], &[0x00, 0x80, 0x01]);
    }

    #[test]
    fn mpint_round_trips() {
        let mut w = WireWriter::new();
        w.put_mpint(&[0x09, 0xa3, 0x78]);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_mpint().unwrap(), vec![0x09, 0xa3, 0x78]);
    }

    #[test]
    fn mpint_matches_rfc4251_worked_example() {
        // RFC 4251 §5: 0x9a378f9b2e332a7 has length 8 and no extra
        // leading-zero padding, since its top byte (0x09) isn't high-bit set.
        let magnitude = hex::decode("09a378f9b2e332a7").unwrap();
        let mut w = WireWriter::new();
        w.put_mpint(&magnitude);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[0..4], &8u32.to_be_bytes());
        assert_eq!(&bytes[4..], magnitude.as_slice());
    }

    #[test]
    fn string_insufficient_bytes_is_protocol_error() {
        let bytes = 10u32.to_be_bytes();
        let mut r = WireReader::new(&bytes);
        assert!(matches!(r.get_string(), Err(SshError::Protocol(_))));
    }

    #[test]
    fn namelist_round_trips() {
        let mut w = WireWriter::new();
        w.put_namelist(&["diffie-hellman-group14-sha256", "diffie-hellman-group1-sha1"]);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let names = r.get_namelist().unwrap();
        assert_eq!(names, vec!["diffie-hellman-group14-sha256", "diffie-hellman-group1-sha1"]);
    }
}
