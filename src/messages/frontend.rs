//! Logic for handling and representing MAPI client requests.

use bytes::{BufMut, BytesMut};

use super::{MAX_PAYLOAD_SIZE, PacketHeader};

/// MAPI requests are plain text, prefixed by a single character that
/// tells the server how to interpret the rest of the message.
///
/// The login line carries no prefix at all.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(u8);

impl MessageCode {
    /// An SQL batch, terminated with `\n;`.
    pub const SQL: Self = Self(b's');
    /// An administrative directive such as `reply_size` or `export`.
    pub const COMMAND: Self = Self(b'X');

    /// Appends a full logical message to `buf`, split into packets.
    #[inline]
    pub fn frame(self, buf: &mut BytesMut, payload_fn: impl FnOnce(&mut BytesMut)) {
        let mut payload = BytesMut::new();
        payload.put_u8(self.0);
        payload_fn(&mut payload);
        frame(buf, &payload);
    }
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
            MessageCode::SQL => "Sql",
            MessageCode::COMMAND => "Command",
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

/// Splits `payload` into packets of at most [`MAX_PAYLOAD_SIZE`] bytes.
///
/// Only the final packet has its "last" bit set. An empty payload still
/// produces one (empty, final) packet.
#[inline]
pub fn frame(buf: &mut BytesMut, payload: &[u8]) {
    let packets = payload.len().div_ceil(MAX_PAYLOAD_SIZE).max(1);
    buf.reserve(payload.len() + packets * PacketHeader::SIZE);

    let mut chunks = payload.chunks(MAX_PAYLOAD_SIZE).peekable();
    if chunks.peek().is_none() {
        buf.put_slice(&PacketHeader::new(0, true).to_le_bytes());
        return;
    }

    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        buf.put_slice(&PacketHeader::new(chunk.len(), last).to_le_bytes());
        buf.put_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Buf, BytesMut};

    use super::{MessageCode, frame};
    use crate::messages::{MAX_PAYLOAD_SIZE, PacketHeader};

    fn split_packets(mut buf: BytesMut) -> Vec<(PacketHeader, Vec<u8>)> {
        let mut packets = Vec::new();
        while buf.has_remaining() {
            let header = PacketHeader::from_le_bytes([buf.get_u8(), buf.get_u8()]);
            let body = buf.split_to(header.len as usize).to_vec();
            packets.push((header, body));
        }
        packets
    }

    #[test]
    fn test_frame_empty() {
        let mut buf = BytesMut::new();
        frame(&mut buf, b"");

        assert_eq!(&buf[..], &[1, 0]);
    }

    #[test]
    fn test_frame_single_packet() {
        let mut buf = BytesMut::new();
        frame(&mut buf, b"sSELECT 1\n;");

        let packets = split_packets(buf);
        assert_eq!(1, packets.len());
        assert!(packets[0].0.last);
        assert_eq!(b"sSELECT 1\n;".to_vec(), packets[0].1);
    }

    #[test]
    fn test_frame_exact_packet_boundary() {
        let payload = vec![b'a'; MAX_PAYLOAD_SIZE];
        let mut buf = BytesMut::new();
        frame(&mut buf, &payload);

        let packets = split_packets(buf);
        assert_eq!(1, packets.len());
        assert!(packets[0].0.last);
        assert_eq!(MAX_PAYLOAD_SIZE, packets[0].1.len());
    }

    #[test]
    fn test_frame_multiple_packets() {
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = BytesMut::new();
        frame(&mut buf, &payload);

        let packets = split_packets(buf);
        assert_eq!(3, packets.len());
        assert_eq!(1, packets.iter().filter(|(h, _)| h.last).count());
        assert!(packets.last().unwrap().0.last);

        let joined: Vec<u8> = packets.into_iter().flat_map(|(_, body)| body).collect();
        assert_eq!(payload, joined);
    }

    #[test]
    fn test_message_code_prefix() {
        let mut buf = BytesMut::new();
        MessageCode::COMMAND.frame(&mut buf, |b| b.extend_from_slice(b"reply_size 200"));

        assert_eq!(&buf[..2], &PacketHeader::new(15, true).to_le_bytes());
        assert_eq!(&buf[2..], b"Xreply_size 200");
    }
}
