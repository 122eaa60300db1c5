//! Length-prefixed JSON framing.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use super::WireMessage;
use crate::config::TransportConfig;
use crate::{Result, TetherError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read one frame. Returns `None` on EOF at a frame boundary.
///
/// EOF part way through the length prefix or the payload is an error.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TetherError::Io {
                message: format!("Stream ended after {} of 4 frame header bytes", filled),
                path: None,
                source: Some(std::io::ErrorKind::UnexpectedEof.into()),
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(TetherError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Frame size {} exceeds maximum {}",
                len,
                TransportConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(TetherError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Frame size {} exceeds maximum {}",
                payload.len(),
                TransportConfig::MAX_FRAME_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and parse one [`WireMessage`].
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<WireMessage>> {
    let Some(frame) = read_frame(reader).await? else {
        return Ok(None);
    };
    let message = serde_json::from_slice(&frame).map_err(|e| TetherError::Json {
        message: format!("Failed to parse wire message: {}", e),
        source: Some(e),
    })?;
    Ok(Some(message))
}

/// Serialize and write one [`WireMessage`].
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &WireMessage,
) -> Result<()> {
    let bytes = serde_json::to_vec(message)?;
    write_frame(writer, &bytes).await
}
