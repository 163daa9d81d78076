//! Length-prefixed frame helpers
//!
//! Every frame is a u32 little-endian byte length followed by the UTF-8
//! JSON message body. The reader returns the raw body so the relay can
//! answer malformed JSON with an `error` reply instead of dropping the
//! connection.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::message::WireMessage;

/// Frames above this size indicate a broken peer or a desynced stream;
/// the connection is dropped rather than resynced.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}")]
    Oversized { len: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read one frame and return the raw message body.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Serialize a message and write it as one frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &WireMessage,
) -> Result<(), FrameError> {
    let body = serde_json::to_vec(msg)?;
    write_raw_frame(writer, &body).await
}

/// Write pre-serialized bytes as one frame (tests use this to send
/// intentionally malformed bodies).
pub async fn write_raw_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), FrameError> {
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(body);
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let msg = WireMessage::heartbeat();
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let body = read_frame(&mut cursor).await.unwrap();
        assert_eq!(WireMessage::decode(&body).unwrap(), msg);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversized { .. }));
    }

    #[tokio::test]
    async fn two_frames_stay_delimited() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WireMessage::heartbeat()).await.unwrap();
        write_frame(&mut buf, &WireMessage::error("boom")).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first = WireMessage::decode(&read_frame(&mut cursor).await.unwrap()).unwrap();
        let second = WireMessage::decode(&read_frame(&mut cursor).await.unwrap()).unwrap();
        assert!(matches!(first, WireMessage::Heartbeat { .. }));
        assert!(matches!(second, WireMessage::Error { .. }));
    }
}
