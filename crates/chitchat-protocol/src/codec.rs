//! Delimiter framing codec.
//!
//! With a non-zero delimiter, [`FrameCodec`] splits the byte stream on that
//! byte and strips it from every frame. Bytes left over when the stream ends
//! without a closing delimiter are discarded.
//!
//! With the zero delimiter ([`PASSTHROUGH`]) the codec never scans: whatever
//! a single read placed in the buffer is handed out as one frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::ProtocolError;

/// Delimiter value that switches the codec into pass-through mode.
pub const PASSTHROUGH: u8 = 0;

/// Splits inbound bytes into frames and terminates outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    delimiter: u8,
    /// Prefix of the read buffer already known not to contain the delimiter.
    next_index: usize,
}

impl FrameCodec {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            next_index: 0,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn is_passthrough(&self) -> bool {
        self.delimiter == PASSTHROUGH
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.is_passthrough() {
            return Ok(Some(src.split().freeze()));
        }

        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|b| *b == self.delimiter) {
            Some(offset) => {
                let end = start + offset;
                self.next_index = 0;
                let mut frame = src.split_to(end + 1);
                frame.truncate(end);
                Ok(Some(frame.freeze()))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(len = src.len(), "dropping partial frame at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(item.len() + 1);
        dst.put(item);
        if !self.is_passthrough() {
            dst.put_u8(self.delimiter);
        }
        Ok(())
    }
}

/// Frame raw bytes for the wire: the payload verbatim, then the delimiter.
///
/// Rejects a payload containing the delimiter, since the peer would read it
/// back as more than one frame.
pub fn encode_raw(payload: impl Into<Bytes>, delimiter: u8) -> Result<Bytes, ProtocolError> {
    let payload = payload.into();
    if delimiter != PASSTHROUGH && payload.contains(&delimiter) {
        return Err(ProtocolError::DelimiterInPayload(delimiter));
    }
    let mut dst = BytesMut::new();
    FrameCodec::new(delimiter).encode(payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Serialize a value as compact JSON and frame it for the wire.
///
/// The JSON is written as-is even when it contains the delimiter byte (a `,`
/// delimiter with an object, say); choosing a delimiter that suits the
/// payloads is up to the caller.
pub fn encode_value<T: Serialize + ?Sized>(value: &T, delimiter: u8) -> Result<Bytes, ProtocolError> {
    let json = serde_json::to_vec(value)?;
    let mut dst = BytesMut::with_capacity(json.len() + 1);
    FrameCodec::new(delimiter).encode(Bytes::from(json), &mut dst)?;
    Ok(dst.freeze())
}
