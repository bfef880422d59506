//! Protocol - Framed Messages Between Coordinator and Devices
//!
//! Every message travels as one frame: a 4-byte big-endian payload length
//! followed by the `bincode` encoding of a `Message`. A reader always knows
//! exactly how many bytes belong to the current message, so large gradient
//! lists are never cut short and two messages never run together.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

/// Largest accepted payload unless configured otherwise (256 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

// =============================================================================
// Messages
// =============================================================================

/// Everything exchanged over a device connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Coordinator to device, once after accept.
    Assign {
        /// Connection index of the receiving device.
        device_index: usize,
        /// Total number of devices in the session.
        num_devices: usize,
    },
    /// Coordinator to device: the device's share of a batch.
    Batch(Vec<Matrix>),
    /// Device to coordinator: gradients computed on the last batch.
    Gradients(Vec<Matrix>),
    /// Coordinator to device: the averaged gradients of the step.
    Reduced(Vec<Matrix>),
    /// Coordinator to device: end of session.
    Shutdown,
}

impl Message {
    /// Short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Assign { .. } => "Assign",
            Message::Batch(_) => "Batch",
            Message::Gradients(_) => "Gradients",
            Message::Reduced(_) => "Reduced",
            Message::Shutdown => "Shutdown",
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Fixed-width little-endian integers; a payload must be consumed exactly.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encodes `message` as a complete frame (length prefix included).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let payload = wire_options()
        .serialize(message)
        .map_err(|e| Error::transport(format!("failed to encode {}: {e}", message.kind())))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::transport(format!("{} payload of {} bytes exceeds frame limit", message.kind(), payload.len()))
    })?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes one payload (without its prefix). Bytes left over after the
/// message are a `Transport` error.
pub fn decode_payload(payload: &[u8]) -> Result<Message> {
    wire_options().deserialize(payload).map_err(|e| Error::transport(format!("malformed payload: {e}")))
}

/// Decodes a complete frame held in memory.
///
/// Fails with `Transport` if the frame is shorter than its prefix claims,
/// longer than `max_frame_len`, or carries trailing bytes.
pub fn decode_frame(frame: &[u8], max_frame_len: usize) -> Result<Message> {
    let prefix: [u8; PREFIX_LEN] = frame
        .get(..PREFIX_LEN)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| Error::transport(format!("truncated frame: {} byte header", frame.len())))?;
    let len = check_len(prefix, max_frame_len)?;
    let payload = &frame[PREFIX_LEN..];
    if payload.len() != len {
        return Err(Error::transport(format!(
            "truncated frame: header announces {len} bytes, got {}",
            payload.len()
        )));
    }
    decode_payload(payload)
}

fn check_len(prefix: [u8; PREFIX_LEN], max_frame_len: usize) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_len {
        return Err(Error::transport(format!(
            "frame of {len} bytes exceeds limit of {max_frame_len}"
        )));
    }
    Ok(len)
}

// =============================================================================
// Stream I/O
// =============================================================================

/// Writes one frame and flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, returning `None` if the peer closed the connection
/// cleanly before a new frame started.
pub async fn try_read_message<R>(reader: &mut R, max_frame_len: usize) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::transport(format!(
                "truncated frame: connection closed after {filled} header bytes"
            )));
        }
        filled += n;
    }

    let len = check_len(prefix, max_frame_len)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::transport(format!("truncated frame: connection closed inside a {len} byte payload"))
        } else {
            Error::from(e)
        }
    })?;
    decode_payload(&payload).map(Some)
}

/// Reads one frame; a closed connection is a `Transport` error.
pub async fn read_message<R>(reader: &mut R, max_frame_len: usize) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    try_read_message(reader, max_frame_len)
        .await?
        .ok_or_else(|| Error::transport("connection closed by peer"))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gradients() -> Message {
        Message::Gradients(vec![
            Matrix::from_rows(vec![vec![1.0, 2.0, 3.0]]).unwrap(),
            Matrix::identity(4),
        ])
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&Message::Shutdown).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(decode_frame(&frame, DEFAULT_MAX_FRAME_LEN).unwrap(), Message::Shutdown);
    }

    #[test]
    fn test_truncated_frame_is_transport_error() {
        let frame = encode_frame(&gradients()).unwrap();
        let err = decode_frame(&frame[..frame.len() - 3], DEFAULT_MAX_FRAME_LEN).unwrap_err();
        assert!(err.is_transport());
        assert!(decode_frame(&frame[..2], DEFAULT_MAX_FRAME_LEN).unwrap_err().is_transport());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = encode_frame(&gradients()).unwrap();
        assert!(decode_frame(&frame, 8).unwrap_err().is_transport());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let mut frame = 6u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0xff; 6]);
        assert!(decode_frame(&frame, DEFAULT_MAX_FRAME_LEN).unwrap_err().is_transport());
    }

    #[test]
    fn test_trailing_payload_bytes_rejected() {
        let mut payload = encode_frame(&Message::Shutdown).unwrap().split_off(4);
        payload.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(decode_payload(&payload).unwrap_err().is_transport());

        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&payload);
        assert!(decode_frame(&frame, DEFAULT_MAX_FRAME_LEN).unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_stream_reads_consecutive_frames() {
        let mut bytes = encode_frame(&gradients()).unwrap();
        bytes.extend(encode_frame(&Message::Shutdown).unwrap());
        let mut reader = &bytes[..];

        assert_eq!(read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap(), gradients());
        assert_eq!(read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap(), Message::Shutdown);
        assert!(try_read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap().is_none());
        assert!(read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_stream_truncated_payload() {
        let bytes = encode_frame(&gradients()).unwrap();
        let mut reader = &bytes[..bytes.len() - 1];
        let err = read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(err.is_transport());

        let mut header_only = &bytes[..2];
        assert!(read_message(&mut header_only, DEFAULT_MAX_FRAME_LEN).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &Message::Assign { device_index: 2, num_devices: 3 })
            .await
            .unwrap();
        let mut reader = &buf[..];
        assert_eq!(
            read_message(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap(),
            Message::Assign { device_index: 2, num_devices: 3 }
        );
    }
}
