//! Length-prefixed frame decoder
//!
//! Wire format, repeated until the peer closes the connection:
//!
//! ```text
//! byte[4]       length   big-endian i32, 1..=limit
//! byte[length]  payload  encoded image
//! ```
//!
//! There is no handshake, acknowledgement or checksum. A close exactly on a
//! frame boundary is the only clean end-of-stream.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::frame::Frame;
use crate::error::{DecodeError, FrameStage};

const LENGTH_PREFIX: usize = 4;

pub struct FrameDecoder<R> {
    reader: R,
    limit: u32,
    frames: u64,
    bytes: u64,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R, limit: u32) -> Self {
        Self {
            reader,
            limit,
            frames: 0,
            bytes: 0,
        }
    }

    /// Frames fully decoded so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    /// Payload bytes fully decoded so far
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes
    }

    /// Decode the next frame. `Ok(None)` means the peer closed between frames.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        match read_full(&mut self.reader, &mut prefix).await? {
            0 => return Ok(None),
            LENGTH_PREFIX => {}
            received => {
                return Err(DecodeError::Truncated {
                    stage: FrameStage::LengthPrefix,
                    expected: LENGTH_PREFIX,
                    received,
                })
            }
        }

        let len = validate_length(i32::from_be_bytes(prefix), self.limit)?;

        let mut payload = BytesMut::zeroed(len);
        let received = read_full(&mut self.reader, &mut payload).await?;
        if received < len {
            return Err(DecodeError::Truncated {
                stage: FrameStage::Payload,
                expected: len,
                received,
            });
        }

        self.frames += 1;
        self.bytes += len as u64;
        trace!(len, frame = self.frames, "frame decoded");

        Ok(Some(Frame::new(payload.freeze())))
    }

    /// Like [`FrameDecoder::next_frame`], but gives up with
    /// [`DecodeError::Cancelled`] once `cancel` fires.
    pub async fn next_frame_or_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Frame>, DecodeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DecodeError::Cancelled),
            frame = self.next_frame() => frame,
        }
    }
}

/// Check a raw length prefix against `1..=limit`.
pub fn validate_length(length: i32, limit: u32) -> Result<usize, DecodeError> {
    if length <= 0 || length as u32 > limit {
        return Err(DecodeError::InvalidLength { length, limit });
    }
    Ok(length as usize)
}

/// Read until `buf` is full or the stream reports end-of-stream.
///
/// Returns how many bytes landed in `buf`: `0` means the stream was already at
/// its end, anything short of `buf.len()` means it closed part way through.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Sender side of the wire format, as the capture device writes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_i32(payload.len() as i32);
    buf.put_slice(payload);
    writer.write_all(&buf).await
}
