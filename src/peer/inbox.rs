use super::message::MAX_MESSAGE_LEN;
use crate::error::{BittorrentError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Growable receive buffer with length-prefix framing.
///
/// Bytes are appended as they are read. A frame is only split off once its
/// full payload is buffered; the declared length is remembered so partial
/// frames cost a single comparison per poll.
#[derive(Debug, Default)]
pub struct Inbox {
    buf: BytesMut,
    expected: Option<usize>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// First buffered byte, if any
    pub fn first(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Remove and return the first `len` bytes, or as many as are buffered
    pub fn pull(&mut self, len: usize) -> Bytes {
        let len = len.min(self.buf.len());
        self.buf.split_to(len).freeze()
    }

    /// Split off the next complete frame body (without its length prefix).
    ///
    /// Returns `Ok(None)` while the prefix or the payload is incomplete.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                let length = self.buf.get_u32() as usize;
                if length > MAX_MESSAGE_LEN {
                    return Err(BittorrentError::ProtocolError(format!(
                        "Message length {} exceeds limit",
                        length
                    )));
                }
                self.expected = Some(length);
                length
            }
        };

        if self.buf.len() < expected {
            return Ok(None);
        }

        self.expected = None;
        Ok(Some(self.buf.split_to(expected).freeze()))
    }
}
