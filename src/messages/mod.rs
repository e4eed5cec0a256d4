//! MAPI wire constants and packet header handling.

pub mod backend;
pub mod frontend;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 8190;

/// Every MAPI packet starts with a 2 byte little-endian header.
///
/// Bit 0 marks the final packet of a logical message, the remaining
/// 15 bits hold the payload length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub len: u16,
    pub last: bool,
}

impl PacketHeader {
    pub const SIZE: usize = size_of::<u16>();

    pub fn new(len: usize, last: bool) -> Self {
        debug_assert!(len <= MAX_PAYLOAD_SIZE);
        Self {
            len: len as u16,
            last,
        }
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; 2] {
        ((self.len << 1) | self.last as u16).to_le_bytes()
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        let raw = u16::from_le_bytes(bytes);
        Self {
            len: raw >> 1,
            last: raw & 1 == 1,
        }
    }
}

impl std::fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PacketHeader(len={}, last={})", self.len, self.last)
    }
}
