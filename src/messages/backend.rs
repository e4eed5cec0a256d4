//! Logic for handling and representing MAPI server responses.

use std::io::Read;

use bytes::{Bytes, BytesMut};

use super::{MAX_PAYLOAD_SIZE, PacketHeader};

/// Server responses are line oriented. The first byte of every line
/// identifies what the line carries; an empty line is the prompt that
/// closes a response.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(u8);

impl MessageCode {
    pub const REDIRECT: Self = Self(b'^');
    pub const QUERY: Self = Self(b'&');
    pub const SCHEMA_HEADER: Self = Self(b'%');
    pub const INFO: Self = Self(b'!');
    pub const TUPLE: Self = Self(b'[');
}

impl From<u8> for MessageCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<MessageCode> for u8 {
    fn from(value: MessageCode) -> Self {
        value.0
    }
}

impl PartialEq<u8> for MessageCode {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            MessageCode::REDIRECT => "Redirect",
            MessageCode::QUERY => "Query",
            MessageCode::SCHEMA_HEADER => "SchemaHeader",
            MessageCode::INFO => "Info",
            MessageCode::TUPLE => "Tuple",
            _ => "Unknown",
        };
        write!(f, "{name}({})", self.0 as char)
    }
}

impl std::fmt::Debug for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageCode({})", self.0 as char)
    }
}

/// The character following a [`MessageCode::QUERY`] marker selects the
/// kind of statement outcome the line describes.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKind(u8);

impl QueryKind {
    pub const TABLE: Self = Self(b'1');
    pub const UPDATE: Self = Self(b'2');
    pub const SCHEMA: Self = Self(b'3');
    pub const TRANSACTION: Self = Self(b'4');
    pub const PREPARE: Self = Self(b'5');
    pub const BLOCK: Self = Self(b'6');
}

impl From<u8> for QueryKind {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl PartialEq<u8> for QueryKind {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            QueryKind::TABLE => "Table",
            QueryKind::UPDATE => "Update",
            QueryKind::SCHEMA => "Schema",
            QueryKind::TRANSACTION => "Transaction",
            QueryKind::PREPARE => "Prepare",
            QueryKind::BLOCK => "Block",
            _ => "Unknown",
        };
        write!(f, "{name}({})", self.0 as char)
    }
}

impl std::fmt::Debug for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueryKind({})", self.0 as char)
    }
}

pub fn read_header_blocking(mut stream: impl Read) -> std::io::Result<PacketHeader> {
    let mut buf = [0; PacketHeader::SIZE];
    stream.read_exact(&mut buf)?;
    Ok(PacketHeader::from_le_bytes(buf))
}

/// Reads packets until one carries the "last" bit and returns the
/// concatenated payload.
///
/// Lengths are byte counts, so multi-byte characters split across
/// packets are reassembled intact.
pub fn read_message_blocking(mut stream: impl Read) -> std::io::Result<Bytes> {
    let mut message = BytesMut::new();
    loop {
        let header = read_header_blocking(&mut stream)?;
        if header.len as usize > MAX_PAYLOAD_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("packet header announces {} bytes", header.len),
            ));
        }
        let start = message.len();
        message.resize(start + header.len as usize, 0);
        stream.read_exact(&mut message[start..])?;

        if header.last {
            return Ok(message.freeze());
        }
    }
}
