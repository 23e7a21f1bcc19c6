//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};

use super::backend::RawMessage;
use super::types::{I16BE, I32BE, U32BE};

/// Cast a big-endian integer off the front of `data`.
#[inline]
fn read_be<'a, T: FromBytes + KnownLayout + Immutable>(
    data: &'a [u8],
    what: &str,
) -> Result<(&'a T, &'a [u8])> {
    T::ref_from_prefix(data).map_err(|_| {
        Error::Protocol(format!(
            "{what}: buffer too short: {} < {}",
            data.len(),
            size_of::<T>()
        ))
    })
}

#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (value, rest) = read_be::<I16BE>(data, "read_i16")?;
    Ok((value.get(), rest))
}

#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (value, rest) = read_be::<I32BE>(data, "read_i32")?;
    Ok((value.get(), rest))
}

#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = read_be::<U32BE>(data, "read_u32")?;
    Ok((value.get(), rest))
}

#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {len}",
            data.len()
        )));
    }
    Ok(data.split_at(len))
}

fn utf8<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| Error::Protocol(format!("{what}: invalid UTF-8")))
}

/// Null-terminated string. The terminator is consumed, not returned.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstr: no null terminator found".into()))?;
    Ok((utf8(&data[..pos], "read_cstr")?, &data[pos + 1..]))
}

/// `len` bytes of UTF-8 with no terminator, as in length-prefixed values.
#[inline]
pub fn read_text(data: &[u8], len: usize) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_bytes(data, len)?;
    Ok((utf8(bytes, "read_text")?, rest))
}

#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Null-terminated string.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Builds one message in place and back-patches its length on [`finish`](Self::finish).
///
/// The length counts itself and the payload but not the type byte.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    length_at: usize,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_startup(buf)
    }

    /// The startup packet has no type byte.
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let length_at = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, length_at }
    }

    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        write_bytes(self.buf, data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    pub fn finish(self) {
        let len = (self.buf.len() - self.length_at) as i32;
        self.buf[self.length_at..self.length_at + 4].copy_from_slice(&len.to_be_bytes());
    }
}

/// Append one complete frame: type byte, length (including itself), payload.
pub fn write_frame(out: &mut Vec<u8>, type_byte: u8, payload: &[u8]) {
    let mut msg = MessageBuilder::new(out, type_byte);
    msg.write_bytes(payload);
    msg.finish();
}

/// Split one complete frame off the front of `data`.
///
/// Returns the frame and the bytes after it. A declared length below 4 or a
/// buffer shorter than the declared length is a protocol error.
pub fn parse_frame(data: &[u8]) -> Result<(RawMessage<'_>, &[u8])> {
    let (type_byte, rest) = read_u8(data)?;
    let (len, rest) = read_i32(rest)?;
    if len < 4 {
        return Err(Error::Protocol(format!(
            "parse_frame: invalid length {len} for message '{}'",
            type_byte as char
        )));
    }
    let (payload, rest) = read_bytes(rest, len as usize - 4)?;
    Ok((RawMessage::new(type_byte, payload), rest))
}

/// Validate a frame header and return the payload length.
///
/// `header` is the 5-byte type + length prefix as read off the stream.
pub fn payload_len(header: &[u8; 5]) -> Result<usize> {
    let (len, _) = read_i32(&header[1..])?;
    if len < 4 {
        return Err(Error::Protocol(format!(
            "invalid length {len} for message '{}'",
            header[0] as char
        )));
    }
    Ok(len as usize - 4)
}
