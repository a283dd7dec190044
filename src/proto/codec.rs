//! Plaintext frame codec
//!
//! Frame layout: `0x00` indicator, varint payload length, varint message
//! type, protobuf payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::ProtocolMessage;
use crate::{Error, Result};

/// Largest payload accepted from the hub
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const PLAINTEXT_INDICATOR: u8 = 0x00;

/// Codec for the plaintext native API framing
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Read a varint from the front of `buf` without consuming it
///
/// Returns `Ok(None)` when more bytes are needed.
fn peek_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(Error::Protocol("varint too long".to_string()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

impl Decoder for FrameCodec {
    type Item = ProtocolMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>> {
        loop {
            let Some(&indicator) = src.first() else {
                return Ok(None);
            };
            if indicator != PLAINTEXT_INDICATOR {
                return Err(Error::Protocol(format!(
                    "unexpected frame indicator {indicator:#04x}"
                )));
            }

            let Some((length, length_len)) = peek_varint(&src[1..])? else {
                return Ok(None);
            };
            let Some((type_id, type_len)) = peek_varint(&src[1 + length_len..])? else {
                return Ok(None);
            };

            let length = usize::try_from(length)
                .ok()
                .filter(|l| *l <= MAX_FRAME_LEN)
                .ok_or_else(|| Error::Protocol(format!("frame too large: {length} bytes")))?;
            let type_id = u32::try_from(type_id)
                .map_err(|_| Error::Protocol(format!("invalid message type {type_id}")))?;

            let header_len = 1 + length_len + type_len;
            if src.len() < header_len + length {
                src.reserve(header_len + length - src.len());
                return Ok(None);
            }

            src.advance(header_len);
            let payload = src.split_to(length);

            match ProtocolMessage::decode(type_id, &payload)? {
                Some(message) => return Ok(Some(message)),
                None => {
                    tracing::debug!(type_id, length, "skipping unknown message type");
                }
            }
        }
    }
}

impl Encoder<ProtocolMessage> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<()> {
        let payload = item.encode_payload();
        dst.reserve(1 + 10 + 5 + payload.len());
        dst.put_u8(PLAINTEXT_INDICATOR);
        prost::encoding::encode_varint(payload.len() as u64, dst);
        prost::encoding::encode_varint(u64::from(item.type_id()), dst);
        dst.put_slice(&payload);
        Ok(())
    }
}
