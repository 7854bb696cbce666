//! # Wire Primitives
//!
//! Bounds-checked reader and writer for the binary packet format.
//!
//! ## Format
//!
//! - Fixed-width integers and floats, little-endian
//! - Booleans as a single byte (zero = false)
//! - Strings as a u16 byte-length prefix followed by UTF-8
//! - 2-D vectors as two f32 components
//!
//! Reads never panic: every accessor checks the remaining length and
//! surfaces truncation as [`DecodeError::Truncated`], which dispatch sites
//! consume with a log-and-ignore.

use thiserror::Error;

use crate::{PeerId, Vec2};

/// Longest string payload accepted on the wire, in bytes.
///
/// Keeps a single chat line comfortably under [`crate::MAX_PACKET_SIZE`].
pub const MAX_STRING_LEN: usize = 512;

/// Failure while decoding a packet. All variants are non-fatal to the
/// receiving loop: the offending packet is dropped and the connection
/// continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ended before the expected field.
    #[error("payload truncated")]
    Truncated,
    /// Top-level opcode byte outside the direction's enumeration.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    /// Lobby sub-opcode byte outside the enumeration.
    #[error("unknown lobby opcode {0}")]
    UnknownLobbyOpcode(u8),
    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    BadUtf8,
    /// A string length prefix exceeded [`MAX_STRING_LEN`].
    #[error("string field of {0} bytes exceeds the {MAX_STRING_LEN} byte limit")]
    StringTooLong(usize),
}

/// Packet writer - appends fields to a growable buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Consumes the writer and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Number of bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Writes a peer id as a u32.
    #[inline]
    pub fn write_peer_id(&mut self, id: PeerId) {
        self.write_u32(id.0);
    }

    /// Writes a length-prefixed UTF-8 string.
    ///
    /// Strings longer than [`MAX_STRING_LEN`] bytes are truncated at a
    /// character boundary with a warning; the protocol never carries more.
    pub fn write_str(&mut self, value: &str) {
        let mut bytes = value.as_bytes();
        if bytes.len() > MAX_STRING_LEN {
            tracing::warn!(
                "string field of {} bytes exceeds the {} byte limit (truncating)",
                bytes.len(),
                MAX_STRING_LEN
            );
            let mut end = MAX_STRING_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            bytes = &value.as_bytes()[..end];
        }
        // Length fits in u16 by construction.
        self.write_u16(bytes.len() as u16);
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a 2-D vector as two f32 components.
    #[inline]
    pub fn write_vec2(&mut self, value: Vec2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }
}

/// Packet reader - consumes fields from a received payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over the given payload.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads a boolean (any non-zero byte is true).
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a peer id.
    #[inline]
    pub fn read_peer_id(&mut self) -> Result<PeerId, DecodeError> {
        Ok(PeerId(self.read_u32()?))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        if len > MAX_STRING_LEN {
            return Err(DecodeError::StringTooLong(len));
        }
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadUtf8)
    }

    /// Reads a 2-D vector.
    #[inline]
    pub fn read_vec2(&mut self) -> Result<Vec2, DecodeError> {
        Ok(Vec2 {
            x: self.read_f32()?,
            y: self.read_f32()?,
        })
    }
}
