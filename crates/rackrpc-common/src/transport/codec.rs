use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Frame;

/// Maximum frame size (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// JSON codec for encoding/decoding frames
///
/// # Example
///
/// ```
/// use rackrpc_common::transport::JsonCodec;
/// use rackrpc_common::{Frame, Request};
/// use serde_json::json;
///
/// let frame = Frame::from(Request::new("Identify", json!({})));
/// let encoded = JsonCodec::encode_frame(&frame).unwrap();
/// let decoded = JsonCodec::decode_frame(&encoded).unwrap();
/// assert_eq!(frame, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(frame)?)
    }

    pub fn decode_frame(data: &[u8]) -> Result<Frame> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Writes one frame with its length prefix and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = JsonCodec::encode_frame(frame)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::InvalidRequest(format!(
            "Message too large: {} bytes (max {} bytes)",
            data.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let len = data.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(&data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;

    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(map_io_error(e, "reading length prefix")),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::InvalidResponse(format!(
            "Message too large: {} bytes (max {} bytes)",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    JsonCodec::decode_frame(&buf).map(Some)
}

/// Map IO errors to appropriate RpcError variants
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            RpcError::Connection(format!("{}: Connection lost", context))
        }
        _ => RpcError::Io(err),
    }
}
