//! Application-layer binary frame codec
//!
//! Every non-JSON uplink payload (audio today) travels inside this envelope,
//! nested in whatever framing the WebSocket itself applies:
//!
//! ```text
//! [0x82][len: u16 BE][type tag: 7 bytes ASCII, zero padded][mask: 4 bytes][masked payload]
//! ```
//!
//! Payload byte `i` is XORed with `mask[i % 4]`. The layout is a wire contract
//! shared with the hardware SDKs and must stay byte-exact.

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{CoreError, Result};

/// Protocol identifier in byte 0
pub const FRAME_MARKER: u8 = 0x82;

/// Fixed header size
pub const HEADER_LEN: usize = 14;

/// Width of the type tag field
pub const TYPE_TAG_LEN: usize = 7;

/// Largest payload the u16 length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Decoded application-layer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Uppercase type tag, trailing zero padding removed
    pub type_tag: String,
    /// Unmasked payload
    pub payload: Bytes,
}

/// Encoder/decoder for the 14-byte header frame
pub struct FrameCodec;

impl FrameCodec {
    /// Encode payload with a freshly generated mask key
    pub fn encode(payload: &[u8], type_tag: &str) -> Result<Bytes> {
        let mut mask = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut mask);
        Self::encode_with_mask(payload, type_tag, mask)
    }

    /// Encode payload with an explicit mask key
    ///
    /// Deterministic; used for interoperability checks against other
    /// implementations.
    pub fn encode_with_mask(payload: &[u8], type_tag: &str, mask: [u8; 4]) -> Result<Bytes> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CoreError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let tag = Self::normalize_tag(type_tag)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(FRAME_MARKER);
        buf.put_u16(payload.len() as u16);
        buf.put_slice(&tag);
        buf.put_slice(&mask);
        buf.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));

        Ok(buf.freeze())
    }

    /// Decode a complete frame
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::InvalidFrame(format!(
                "buffer of {} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_LEN
            )));
        }
        if buf[0] != FRAME_MARKER {
            return Err(CoreError::InvalidFrame(format!(
                "unexpected marker 0x{:02X}",
                buf[0]
            )));
        }

        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let body = &buf[HEADER_LEN..];
        if body.len() != len {
            return Err(CoreError::InvalidFrame(format!(
                "header declares {} payload bytes, found {}",
                len,
                body.len()
            )));
        }

        let tag_bytes = &buf[3..3 + TYPE_TAG_LEN];
        let tag_end = tag_bytes
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |pos| pos + 1);
        let type_tag = String::from_utf8_lossy(&tag_bytes[..tag_end]).into_owned();

        let mask = [buf[10], buf[11], buf[12], buf[13]];
        let payload: Vec<u8> = body
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect();

        Ok(Frame {
            type_tag,
            payload: Bytes::from(payload),
        })
    }

    /// Uppercase, truncate to 7 bytes and zero-pad the type tag
    fn normalize_tag(type_tag: &str) -> Result<[u8; TYPE_TAG_LEN]> {
        if !type_tag.is_ascii() {
            return Err(CoreError::InvalidParameter(format!(
                "type tag {:?} is not ASCII",
                type_tag
            )));
        }
        let mut tag = [0u8; TYPE_TAG_LEN];
        for (slot, b) in tag.iter_mut().zip(type_tag.bytes()) {
            *slot = b.to_ascii_uppercase();
        }
        Ok(tag)
    }
}
