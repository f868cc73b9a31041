//! Newline-delimited JSON framing.
//!
//! Wire format: one compact JSON object per line, `\n` terminated.
//!
//! The underlying socket has no message boundaries, so the decoder buffers
//! partial lines, splits coalesced writes, and drops lines that fail to
//! parse without ending the stream.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use axon_core::{IpcError, Payload};

/// Frames larger than this are rejected in both directions (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub struct PayloadCodec {
    max_frame_len: usize,
    /// Scan resume point so repeated partial reads stay linear.
    next_index: usize,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PayloadCodec {
    type Item = Payload;
    type Error = IpcError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Payload>, IpcError> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|&b| b == b'\n') else {
                if buf.len() > self.max_frame_len {
                    return Err(IpcError::FrameTooLarge {
                        len: buf.len(),
                        max: self.max_frame_len,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let line = buf.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_frame_len {
                return Err(IpcError::FrameTooLarge {
                    len: line.len(),
                    max: self.max_frame_len,
                });
            }

            // Malformed or non-object lines are dropped; the stream lives on.
            match serde_json::from_slice::<serde_json::Value>(line) {
                Ok(value) => match Payload::from_value(value) {
                    Ok(payload) => return Ok(Some(payload)),
                    Err(error) => {
                        tracing::warn!(%error, "discarding non-object frame");
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, len = line.len(), "discarding malformed frame");
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Payload>, IpcError> {
        match self.decode(buf)? {
            Some(payload) => Ok(Some(payload)),
            None => {
                if !buf.is_empty() {
                    tracing::warn!(len = buf.len(), "discarding partial frame at stream end");
                    buf.clear();
                    self.next_index = 0;
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Payload> for PayloadCodec {
    type Error = IpcError;

    fn encode(&mut self, payload: Payload, buf: &mut BytesMut) -> Result<(), IpcError> {
        let bytes = serde_json::to_vec(&payload)?;
        if bytes.len() > self.max_frame_len {
            return Err(IpcError::FrameTooLarge {
                len: bytes.len(),
                max: self.max_frame_len,
            });
        }
        buf.reserve(bytes.len() + 1);
        buf.put_slice(&bytes);
        buf.put_u8(b'\n');
        Ok(())
    }
}
