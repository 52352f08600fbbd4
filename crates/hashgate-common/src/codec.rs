//! Length-prefixed frame codec.
//!
//! Wire format: `[4-byte length prefix as u32 big-endian] + [JSON body]`.
//!
//! Decoding is incremental: the [`FrameDecoder`] buffers whatever the socket
//! produced and only consumes bytes once a complete frame is available, so a
//! read that ends mid-frame leaves the residual bytes in place for the next
//! read. A frame whose length prefix exceeds [`MAX_FRAME_SIZE`] is a protocol
//! error; the owning connection must be torn down.

use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::error::{HashgateError, Result};
use crate::protocol::{Request, Response};

/// Maximum accepted frame body size.
///
/// Hashing payloads are tiny; the cap exists to bound allocation when the
/// length prefix is garbage (which usually means the stream is desynced).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Wraps a frame body in the length-prefixed wire format.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Encodes a request into a ready-to-send frame.
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(request)?;
    Ok(encode_frame(&body))
}

/// Decodes a response frame body.
///
/// Malformed JSON maps to [`HashgateError::Protocol`] since it means the
/// stream can no longer be trusted.
pub fn decode_response(body: &[u8]) -> Result<Response> {
    serde_json::from_slice(body)
        .map_err(|e| HashgateError::Protocol(format!("undecodable response frame: {}", e)))
}

/// Incremental frame decoder.
///
/// Feed raw socket reads in with [`extend`](Self::extend), then pull complete
/// frames out with [`next_frame`](Self::next_frame). One read may carry zero,
/// one or several frames; partial frames stay buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete frame body, if one is buffered.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not yet form a complete
    /// frame; in that case nothing is consumed. Returns an error when the
    /// length prefix exceeds [`MAX_FRAME_SIZE`].
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let len =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(HashgateError::Protocol(format!(
                "frame length {} exceeds {} byte limit",
                len, MAX_FRAME_SIZE
            )));
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}
