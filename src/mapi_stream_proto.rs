use std::{
    io::{ErrorKind, Read, Write},
    thread,
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};

use crate::messages::{backend, frontend};

/// Pause after a write that accepted zero bytes.
#[cfg(not(test))]
const WRITE_BACKOFF: Duration = Duration::from_millis(100);
#[cfg(test)]
const WRITE_BACKOFF: Duration = Duration::from_millis(1);
/// Consecutive zero byte writes tolerated before giving up.
const MAX_WRITE_STALLS: u32 = 50;

/// Low-level MAPI stream: buffers framed outgoing messages and reads
/// whole logical messages back.
pub struct MapiStreamProto<S> {
    pub(crate) stream: S,
    pub(crate) buf: BytesMut,
}

impl<S> MapiStreamProto<S> {
    pub fn from_stream(stream: S) -> Self {
        MapiStreamProto {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.stream, self.buf.to_vec())
    }

    /// Frames an unprefixed message, e.g. the login line.
    pub fn put_message(&mut self, payload: &[u8]) -> &mut Self {
        frontend::frame(&mut self.buf, payload);
        self
    }

    pub fn put_query(&mut self, stmt: &[u8]) -> &mut Self {
        frontend::MessageCode::SQL.frame(&mut self.buf, |b| {
            b.extend_from_slice(stmt);
            b.extend_from_slice(b"\n;");
        });
        self
    }

    /// `sEXECUTE {id}({args});`, the statement terminator is inline.
    pub fn put_execute(&mut self, id: i64, args: &[u8]) -> &mut Self {
        frontend::MessageCode::SQL.frame(&mut self.buf, |b| {
            b.extend_from_slice(format!("EXECUTE {id}(").as_bytes());
            b.extend_from_slice(args);
            b.extend_from_slice(b");");
        });
        self
    }

    pub fn put_command(&mut self, command: &[u8]) -> &mut Self {
        frontend::MessageCode::COMMAND.frame(&mut self.buf, |b| {
            b.extend_from_slice(command);
        });
        self
    }
}

impl<S: Write> MapiStreamProto<S> {
    /// Writes out everything buffered so far.
    ///
    /// Partial writes are resumed. A write that accepts zero bytes is
    /// treated as backpressure and retried after a short pause.
    pub fn flush_blocking(&mut self) -> std::io::Result<()> {
        let mut stalls = 0;
        while self.buf.has_remaining() {
            match self.stream.write(&self.buf) {
                Ok(0) => {
                    stalls += 1;
                    if stalls > MAX_WRITE_STALLS {
                        self.buf.clear();
                        return Err(ErrorKind::WriteZero.into());
                    }
                    tracing::debug!(stalls, "zero byte write, backing off");
                    thread::sleep(WRITE_BACKOFF);
                }
                Ok(n) => {
                    stalls = 0;
                    self.buf.advance(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            }
        }
        self.buf.clear();
        self.stream.flush()
    }
}

impl<S: Read> MapiStreamProto<S> {
    pub fn read_message_blocking(&mut self) -> std::io::Result<Bytes> {
        backend::read_message_blocking(&mut self.stream)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::MAX_WRITE_STALLS;
    use crate::{MapiStreamProto, messages::PacketHeader};

    /// Accepts at most `chunk` bytes per call and refuses every other call.
    struct Trickle {
        written: Vec<u8>,
        chunk: usize,
        calls: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(std::io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Accepts nothing for the first `stalls` calls.
    struct Stalled {
        written: Vec<u8>,
        stalls: u32,
        calls: u32,
    }

    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            if self.calls <= self.stalls {
                return Ok(0);
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_put_query() {
        let mut proto = MapiStreamProto::from_stream(Vec::<u8>::new());
        proto.put_query(b"SELECT 1");

        assert_eq!(&proto.buf[..2], &PacketHeader::new(11, true).to_le_bytes());
        assert_eq!(&proto.buf[2..], b"sSELECT 1\n;");
    }

    #[test]
    fn test_put_command() {
        let mut proto = MapiStreamProto::from_stream(Vec::<u8>::new());
        proto.put_command(b"export 3 200 100");

        assert_eq!(&proto.buf[2..], b"Xexport 3 200 100");
    }

    #[test]
    fn test_put_execute() {
        let mut proto = MapiStreamProto::from_stream(Vec::<u8>::new());
        proto.put_execute(7, b"1, 'cat'");

        assert_eq!(&proto.buf[2..], b"sEXECUTE 7(1, 'cat');");
    }

    #[test]
    fn test_flush_blocking() {
        let mut proto = MapiStreamProto::from_stream(Vec::<u8>::new());
        proto.put_message(b"LIT:monetdb:{SHA512}00:sql:demo:\n");
        proto.flush_blocking().unwrap();

        let (stream, rest) = proto.into_parts();
        assert!(rest.is_empty());
        assert_eq!(&stream[2..], b"LIT:monetdb:{SHA512}00:sql:demo:\n");
    }

    #[test]
    fn test_flush_partial_writes() {
        let mut proto = MapiStreamProto::from_stream(Trickle {
            written: Vec::new(),
            chunk: 3,
            calls: 0,
        });
        proto.put_query(b"SELECT 42");
        proto.flush_blocking().unwrap();

        let (stream, _) = proto.into_parts();
        assert_eq!(&stream.written[2..], b"sSELECT 42\n;");
    }

    #[test]
    fn test_flush_zero_writes() {
        let mut proto = MapiStreamProto::from_stream(Stalled {
            written: Vec::new(),
            stalls: 3,
            calls: 0,
        });
        proto.put_command(b"reply_size 100");
        proto.flush_blocking().unwrap();

        let (stream, rest) = proto.into_parts();
        assert!(rest.is_empty());
        assert_eq!(4, stream.calls);
        assert_eq!(&stream.written[2..], b"Xreply_size 100");
    }

    #[test]
    fn test_flush_gives_up_when_stalled() {
        let mut proto = MapiStreamProto::from_stream(Stalled {
            written: Vec::new(),
            stalls: u32::MAX,
            calls: 0,
        });
        proto.put_query(b"SELECT 1");
        let err = proto.flush_blocking().unwrap_err();
        assert_eq!(std::io::ErrorKind::WriteZero, err.kind());

        let (stream, rest) = proto.into_parts();
        assert_eq!(MAX_WRITE_STALLS + 1, stream.calls);
        assert!(stream.written.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_flush_hard_error() {
        let mut proto = MapiStreamProto::from_stream(Broken);
        proto.put_query(b"SELECT 1");
        let err = proto.flush_blocking().unwrap_err();

        assert_eq!(std::io::ErrorKind::BrokenPipe, err.kind());
        assert!(proto.buf.is_empty());
    }
}
