//! Byte-stream to text decoding for the inbound direction.
//!
//! The stream carries no framing, so a read may end in the middle of a
//! multi-byte UTF-8 character. The decoder keeps such a tail until the next
//! chunk arrives. Bytes that can never form valid UTF-8 are shown as U+FFFD.

use bytes::{Buf, BytesMut};
use std::char::REPLACEMENT_CHARACTER;

/// Incremental UTF-8 decoder for stream chunks
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: BytesMut,
}

impl Utf8ChunkDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode one chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut text = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(REPLACEMENT_CHARACTER);
                            self.pending.advance(valid_up_to + bad);
                        }
                        None => {
                            // incomplete tail
                            self.pending.advance(valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
