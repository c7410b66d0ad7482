//! Length-prefixed frames on the WebTransport bidirectional stream
//!
//! Every client and server message travels as `[u32 LE length][bincode payload]`.
//! The two directions have different ceilings: client frames are small
//! commands (`network::MAX_CLIENT_MESSAGE_SIZE`), server frames may carry a
//! full world snapshot (`network::MAX_SERVER_MESSAGE_SIZE`). The length is
//! checked before any payload byte is buffered.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Peer closed the stream, possibly mid-frame
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FramingError::ConnectionClosed
        } else {
            FramingError::Io(e)
        }
    }
}

/// Read the next frame. A declared length above `max_len` is rejected
/// without reading the payload; the caller drops the connection.
pub async fn read_message<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, FramingError> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.map_err(FramingError::from_read)?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(FramingError::MessageTooLarge(len, max_len));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.map_err(FramingError::from_read)?;
    }
    Ok(payload)
}

/// Write one frame and flush it. Oversized payloads are refused before
/// anything reaches the stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
    max_len: usize,
) -> Result<(), FramingError> {
    if data.len() > max_len {
        return Err(FramingError::MessageTooLarge(data.len(), max_len));
    }

    stream.write_all(&(data.len() as u32).to_le_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MAX: usize = 64;

    #[tokio::test]
    async fn test_read_write_message() {
        let data = b"Hello, snakes!";
        let mut buffer = Vec::new();
        write_message(&mut buffer, data, MAX).await.unwrap();
        assert_eq!(&buffer[..4], &(data.len() as u32).to_le_bytes());

        let mut cursor = Cursor::new(buffer);
        let result = read_message(&mut cursor, MAX).await.unwrap();
        assert_eq!(result, data);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"", MAX).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert!(read_message(&mut cursor, MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mut buffer = Vec::new();
        let result = write_message(&mut buffer, &[0u8; MAX + 1], MAX).await;
        assert!(matches!(result, Err(FramingError::MessageTooLarge(65, 64))));
        assert!(buffer.is_empty());

        let mut framed = Vec::new();
        framed.extend_from_slice(&1000u32.to_le_bytes());
        let mut cursor = Cursor::new(framed);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::MessageTooLarge(1000, 64))));
    }

    #[tokio::test]
    async fn test_read_truncated_length() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10u32.to_le_bytes());
        buffer.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(buffer);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_multiple_messages() {
        let messages = vec![b"join".to_vec(), b"input".to_vec(), b"ping".to_vec()];

        let mut buffer = Vec::new();
        for msg in &messages {
            write_message(&mut buffer, msg, MAX).await.unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &messages {
            assert_eq!(&read_message(&mut cursor, MAX).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        // Length prefix and payload arrive in separate stream chunks
        let mut stream = tokio_test::io::Builder::new()
            .read(&[5, 0])
            .read(&[0, 0, b's'])
            .read(b"nake")
            .build();
        assert_eq!(read_message(&mut stream, MAX).await.unwrap(), b"snake");
    }

    #[tokio::test]
    async fn test_client_limit_rejects_snapshot_sized_frame() {
        use crate::game::constants::network;

        let mut framed = Vec::new();
        framed.extend_from_slice(&((network::MAX_CLIENT_MESSAGE_SIZE + 1) as u32).to_le_bytes());
        let mut cursor = Cursor::new(framed.clone());
        assert!(matches!(
            read_message(&mut cursor, network::MAX_CLIENT_MESSAGE_SIZE).await,
            Err(FramingError::MessageTooLarge(_, network::MAX_CLIENT_MESSAGE_SIZE))
        ));

        // The same declared length is fine in the server direction, so it
        // only fails for lack of payload bytes
        let mut cursor = Cursor::new(framed);
        assert!(matches!(
            read_message(&mut cursor, network::MAX_SERVER_MESSAGE_SIZE).await,
            Err(FramingError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_prefix_then_payload() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&[3, 0, 0, 0])
            .write(b"abc")
            .build();
        write_message(&mut stream, b"abc", MAX).await.unwrap();
    }
}
