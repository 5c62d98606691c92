//! Chitchat protocol — framing and outbound encoding.
//!
//! The wire format is a plain byte stream split on a configurable delimiter
//! byte. This crate holds everything about that format that does not touch a
//! socket: the [`FrameCodec`] used by the transport's frame reader and the
//! encoders used when writing values back to a peer.

pub mod codec;
pub mod error;

pub use codec::{FrameCodec, PASSTHROUGH, encode_raw, encode_value};
pub use error::ProtocolError;
