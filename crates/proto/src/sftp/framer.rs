//! Length-prefix framing for the SFTP byte stream.
//!
//! The SSH channel delivers an undelimited byte stream; the [`Framer`]
//! accumulates it and pops one whole packet body at a time. Outbound
//! framing is the job of [`Request::encode`](super::message::Request::encode)
//! and [`Response::encode`](super::message::Response::encode), which prepend
//! the 4-byte length themselves; the writer loop sends each encoded packet
//! as a single write so packets never interleave.

use super::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Default ceiling for one inbound frame.
///
/// Large enough for the DATA and NAME replies a busy server produces; a
/// frame above this is treated as a protocol fault rather than buffered.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Accumulates inbound bytes and yields complete packet bodies.
///
/// A popped frame is the packet *body* (type byte plus payload); the length
/// prefix is consumed by the framer itself.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    max_frame_len: usize,
}

impl Framer {
    /// Creates a framer with the given frame ceiling.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len,
        }
    }

    /// Appends raw bytes received from the channel.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The internal buffer, exposed so the read loop can fill it without an
    /// intermediate copy (`AsyncReadExt::read_buf`).
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pops the next complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A zero-length or
    /// over-ceiling frame is a fatal protocol fault.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let declared = declared as usize;

        if declared == 0 {
            return Err(Error::Malformed("zero-length frame".to_string()));
        }
        if declared > self.max_frame_len {
            return Err(Error::Malformed(format!(
                "frame of {} bytes exceeds the {} byte ceiling",
                declared, self.max_frame_len
            )));
        }

        if self.buf.len() < 4 + declared {
            return Ok(None);
        }

        self.buf.advance(4);
        Ok(Some(self.buf.split_to(declared).freeze()))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
