use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, WirecallError};

/// Frames are handed to the transport in chunks of at most 16 KiB.
///
/// This is a transmission-pacing policy, not a semantic boundary; receivers
/// reassemble from the buffer regardless of how writes were split.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum payload size (100 MB), preventing allocation of excessively large
/// buffers from a hostile or corrupted length prefix.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Length prefix size: u32 big-endian.
pub const FRAME_HEADER_LEN: usize = 4;

/// Writes one frame: `[4-byte length as u32 big-endian] + [payload]`,
/// split into chunks of at most [`MAX_CHUNK_SIZE`].
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(WirecallError::Decode(format!(
            "message too large: {} bytes (max {} bytes)",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    for chunk in frame.chunks(MAX_CHUNK_SIZE) {
        writer
            .write_all(chunk)
            .await
            .map_err(|e| WirecallError::Connection(format!("failed to write frame: {e}")))?;
    }

    writer
        .flush()
        .await
        .map_err(|e| WirecallError::Connection(format!("failed to flush frame: {e}")))?;

    Ok(())
}

/// Reassembles length-prefixed frames from an incoming byte stream.
///
/// Incoming bytes append to a growable buffer; whole frames are consumed as
/// soon as the declared payload length is buffered. Partial trailing data is
/// never discarded.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes to the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Consumes and returns the next complete frame's payload, if buffered.
    ///
    /// Returns `Ok(None)` while the buffer holds less than one whole frame.
    /// A declared length above [`MAX_MESSAGE_SIZE`] is a fatal decode error.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let declared = u32::from_be_bytes(self.buf[..FRAME_HEADER_LEN].try_into().unwrap()) as usize;
        if declared > MAX_MESSAGE_SIZE {
            return Err(WirecallError::Decode(format!(
                "message too large: {declared} bytes (max {MAX_MESSAGE_SIZE} bytes)"
            )));
        }

        if self.buf.len() < FRAME_HEADER_LEN + declared {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buf.split_to(declared).to_vec()))
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
