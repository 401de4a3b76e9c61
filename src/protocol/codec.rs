use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use super::cipher;
use crate::core::{Error, MAX_FRAME_SIZE};

/// Framed codec for the Kasa TCP transport
///
/// A frame is a 4-byte big-endian length prefix giving the exact byte count of
/// the autokey-encoded JSON payload that follows; there are no other
/// delimiters.
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Need more data to read the length prefix
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame length {} exceeds maximum {}",
                length, MAX_FRAME_SIZE
            )));
        }

        if src.len() < 4 + length {
            // Need more data to read the full payload
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(length);
        let plaintext = cipher::decode(&payload);

        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|e| Error::protocol(format!("failed to parse frame payload: {}", e)))
    }
}

impl<'a> Encoder<&'a Value> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: &Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let plaintext = serde_json::to_vec(item)
            .map_err(|e| Error::protocol(format!("failed to serialize command: {}", e)))?;
        let payload = cipher::encode(&plaintext);

        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
