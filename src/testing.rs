//! In-memory server used by unit tests.

use std::io::{Cursor, Read, Write};

use bytes::BytesMut;

use crate::messages::{backend, frontend};

/// Replays pre-framed server messages and records what the client sends.
pub(crate) struct Script {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Script {
    pub(crate) fn new(messages: &[&str]) -> Self {
        let mut input = BytesMut::new();
        for message in messages {
            frontend::frame(&mut input, message.as_bytes());
        }
        Self {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
        }
    }

    /// Every message the client wrote, unframed.
    pub(crate) fn sent(&self) -> Vec<String> {
        let mut reader = self.output.as_slice();
        let mut messages = Vec::new();
        while !reader.is_empty() {
            let message = backend::read_message_blocking(&mut reader).unwrap();
            messages.push(String::from_utf8(message.to_vec()).unwrap());
        }
        messages
    }
}

impl Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Script {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
