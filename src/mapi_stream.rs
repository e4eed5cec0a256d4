use std::io::{Read, Write};

use bytes::Bytes;

use crate::{Error, MapiStreamProto, Result};

/// High-level MAPI stream.
///
/// Wraps `MapiStreamProto` to expose the server's replies as a sequence
/// of text lines, hiding packet boundaries. One logical message is
/// buffered at a time.
pub struct MapiStream<S> {
    proto: MapiStreamProto<S>,
    message: Bytes,
    cursor: usize,
}

impl<S> MapiStream<S> {
    /// Creates a new MAPI stream from an underlying byte stream.
    pub fn from_stream(stream: S) -> Self {
        MapiStream {
            proto: MapiStreamProto::from_stream(stream),
            message: Bytes::new(),
            cursor: 0,
        }
    }

    /// Consumes the stream and returns the underlying stream and any
    /// unsent data.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        self.proto.into_parts()
    }

    /// Adds an SQL batch to the buffer.
    pub fn put_query(&mut self, sql: impl AsRef<str>) -> &mut Self {
        let sql = sql.as_ref();
        tracing::debug!(sql, "sending query");
        self.proto.put_query(sql.as_bytes());
        self
    }

    /// Adds the execution of a prepared statement with rendered arguments.
    pub fn put_execute(&mut self, id: i64, args: &str) -> &mut Self {
        tracing::debug!(id, args, "executing prepared statement");
        self.proto.put_execute(id, args.as_bytes());
        self
    }

    /// Adds an administrative command (sent with the `X` prefix).
    pub fn put_command(&mut self, command: impl AsRef<str>) -> &mut Self {
        let command = command.as_ref();
        tracing::debug!(command, "sending command");
        self.proto.put_command(command.as_bytes());
        self
    }

    /// Adds a message without any prefix, used for the login line.
    pub fn put_raw(&mut self, msg: impl AsRef<[u8]>) -> &mut Self {
        self.proto.put_message(msg.as_ref());
        self
    }

    /// Returns the next line of the buffered message, without its
    /// newline, or `None` once the message is exhausted.
    pub fn next_line(&mut self) -> Result<Option<&str>> {
        if self.cursor >= self.message.len() {
            return Ok(None);
        }

        let rest = &self.message[self.cursor..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.cursor += consumed;

        let line = std::str::from_utf8(line).map_err(|e| {
            Error::MalformedResponse(format!("line is not valid UTF-8: {e}"))
        })?;
        tracing::trace!(line, "received");
        Ok(Some(line))
    }

    /// Whether the buffered message still has unread lines.
    pub fn has_pending_lines(&self) -> bool {
        self.cursor < self.message.len()
    }

    /// Drops whatever is left of the buffered message.
    pub fn discard_message(&mut self) {
        self.message = Bytes::new();
        self.cursor = 0;
    }
}

impl<S: Read> MapiStream<S> {
    /// Blocks until the next full message has arrived and makes it the
    /// current one. Unread lines of the previous message are dropped.
    pub fn read_message(&mut self) -> Result<()> {
        self.message = self.proto.read_message_blocking()?;
        self.cursor = 0;
        Ok(())
    }
}

impl<S: Write> MapiStream<S> {
    /// Flushes the buffered requests to the stream.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.proto.flush_blocking()?)
    }
}
