//! Envelope framing — one newline-terminated JSON value per frame.
//!
//! Both connections carry self-delimited JSON objects, at most
//! [`MAX_FRAME_SIZE`] bytes each including the terminator. Oversize frames
//! are fatal in either direction. EOF surfaces as the end of the framed
//! stream (`None`), not as an error; callers treat it as disconnect.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size in bytes, including the trailing `\n`.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Codec error: framing bound, JSON decode failure, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame exceeds maximum size ({MAX_FRAME_SIZE} bytes)")]
    FrameTooLong,
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec framing envelopes of type `T` on `\n` boundaries.
#[derive(Debug)]
pub struct JsonCodec<T> {
    _marker: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos + 1 > MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLong);
                }
                let frame = src.split_to(pos);
                src.advance(1); // skip \n
                Ok(Some(serde_json::from_slice(&frame)?))
            }
            None => {
                // No complete frame yet; a buffer past the bound can never
                // become a valid frame.
                if src.len() >= MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLong);
                }
                Ok(None)
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        if json.len() + 1 > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLong);
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
