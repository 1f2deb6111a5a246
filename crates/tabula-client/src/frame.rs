//! Frame encoding and decoding for the native protocol (v3 and v4).
//!
//! ```text
//! version(1) | flags(1) | stream(2, signed) | opcode(1) | length(4) | body
//! ```
//!
//! The high bit of the version byte marks a response. Server-pushed
//! events carry stream id `-1`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tabula_types::ProtocolVersion;

use crate::error::{ClientError, ClientResult};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default limit on a frame body (256 MiB).
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Stream id of server-pushed events.
pub const EVENT_STREAM: i16 = -1;

const RESPONSE_BIT: u8 = 0x80;

/// Message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Error,
    Startup,
    Ready,
    Authenticate,
    Options,
    Supported,
    Query,
    Result,
    Prepare,
    Execute,
    Register,
    Event,
    Batch,
    AuthChallenge,
    AuthResponse,
    AuthSuccess,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Error => 0x00,
            Self::Startup => 0x01,
            Self::Ready => 0x02,
            Self::Authenticate => 0x03,
            Self::Options => 0x05,
            Self::Supported => 0x06,
            Self::Query => 0x07,
            Self::Result => 0x08,
            Self::Prepare => 0x09,
            Self::Execute => 0x0A,
            Self::Register => 0x0B,
            Self::Event => 0x0C,
            Self::Batch => 0x0D,
            Self::AuthChallenge => 0x0E,
            Self::AuthResponse => 0x0F,
            Self::AuthSuccess => 0x10,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ClientError;

    fn try_from(value: u8) -> ClientResult<Self> {
        Ok(match value {
            0x00 => Self::Error,
            0x01 => Self::Startup,
            0x02 => Self::Ready,
            0x03 => Self::Authenticate,
            0x05 => Self::Options,
            0x06 => Self::Supported,
            0x07 => Self::Query,
            0x08 => Self::Result,
            0x09 => Self::Prepare,
            0x0A => Self::Execute,
            0x0B => Self::Register,
            0x0C => Self::Event,
            0x0D => Self::Batch,
            0x0E => Self::AuthChallenge,
            0x0F => Self::AuthResponse,
            0x10 => Self::AuthSuccess,
            other => return Err(ClientError::protocol(format!("unknown opcode {other:#04x}"))),
        })
    }
}

/// Header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const COMPRESSION: Self = Self(0x01);
    pub const TRACING: Self = Self(0x02);
    pub const CUSTOM_PAYLOAD: Self = Self(0x04);
    pub const WARNING: Self = Self(0x08);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Metadata in front of every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: ProtocolVersion,
    pub response: bool,
    pub flags: FrameFlags,
    pub stream: i16,
    pub opcode: Opcode,
    pub length: u32,
}

impl FrameHeader {
    /// Encodes the header to bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        let direction = if self.response { RESPONSE_BIT } else { 0 };
        buf.put_u8(self.version.as_u8() | direction);
        buf.put_u8(self.flags.bits());
        buf.put_i16(self.stream);
        buf.put_u8(self.opcode.as_u8());
        buf.put_u32(self.length);
    }

    /// Decodes a header, or returns `None` if fewer than nine bytes are
    /// available.
    pub fn decode(mut buf: &[u8]) -> ClientResult<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let version_byte = buf.get_u8();
        let version = ProtocolVersion::try_from(version_byte)?;
        if version == ProtocolVersion::V5 {
            return Err(ClientError::protocol("v5 segment framing is not supported"));
        }
        Ok(Some(Self {
            version,
            response: version_byte & RESPONSE_BIT != 0,
            flags: FrameFlags::from_bits(buf.get_u8()),
            stream: buf.get_i16(),
            opcode: Opcode::try_from(buf.get_u8())?,
            length: buf.get_u32(),
        }))
    }
}

/// A complete frame with header and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    /// Creates a request frame.
    pub fn request(
        version: ProtocolVersion,
        flags: FrameFlags,
        stream: i16,
        opcode: Opcode,
        body: Bytes,
    ) -> Self {
        Self {
            header: FrameHeader {
                version,
                response: false,
                flags,
                stream,
                opcode,
                length: body.len() as u32,
            },
            body,
        }
    }

    /// Creates a response frame.
    pub fn response(
        version: ProtocolVersion,
        flags: FrameFlags,
        stream: i16,
        opcode: Opcode,
        body: Bytes,
    ) -> Self {
        let mut frame = Self::request(version, flags, stream, opcode, body);
        frame.header.response = true;
        frame
    }

    pub fn stream(&self) -> i16 {
        self.header.stream
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Encodes the frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + self.body.len());
        self.header.encode(buf);
        buf.put_slice(&self.body);
    }

    /// Attempts to decode a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. On success the
    /// consumed bytes are removed from the buffer.
    pub fn decode(buf: &mut BytesMut, max_body: usize) -> ClientResult<Option<Self>> {
        let Some(header) = FrameHeader::decode(&buf[..])? else {
            return Ok(None);
        };
        let length = header.length as usize;
        if length > max_body {
            return Err(ClientError::FrameTooLarge {
                size: length,
                max: max_body,
            });
        }
        if buf.len() < FRAME_HEADER_SIZE + length {
            buf.reserve(FRAME_HEADER_SIZE + length - buf.len());
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(length).freeze();
        Ok(Some(Self { header, body }))
    }
}
