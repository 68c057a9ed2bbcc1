//! Length-prefixed JSON framing used on the player channel.
//!
//! A message on the wire is `uint32BE(len(payload)) || payload`, where
//! `payload` is UTF-8 encoded JSON and `len` counts payload bytes only.
//! A receiver reads exactly 4 bytes to obtain `len`, then exactly `len`
//! further bytes, then parses them as JSON. Some historical peers counted
//! the header in the prefix; this crate does not.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload. A prefix above this is treated as
/// a corrupt stream rather than an allocation request.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Errors from encoding or decoding a single frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Short read/write or other I/O failure mid-frame.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Length prefix exceeds [`MAX_PAYLOAD_LEN`].
    #[error("frame length {0} exceeds maximum {MAX_PAYLOAD_LEN}")]
    TooLarge(u32),
    /// Payload bytes are not valid JSON.
    #[error("frame payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one frame and parse its payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Value, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Serialize `message` and write it as one frame.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(len));
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod framing_tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    fn wire(payload: &str) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn round_trip() {
        let messages = [
            json!({}),
            json!({"player_id": 3}),
            json!({"game_state": {"round": 1, "pot": [1, 2, 3]}}),
            json!({"decision": true, "note": "héllo ▲ 世界"}),
            json!(null),
        ];
        for message in messages {
            let mut cursor = Cursor::new(Vec::new());
            write_frame(&mut cursor, &message).await.unwrap();
            let bytes = cursor.into_inner();
            let decoded = read_frame(&mut bytes.as_slice()).await.unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[tokio::test]
    async fn prefix_counts_payload_bytes_only() {
        let mut cursor = Cursor::new(Vec::new());
        write_frame(&mut cursor, &json!({"decision": true}))
            .await
            .unwrap();
        let bytes = cursor.into_inner();

        let payload = serde_json::to_vec(&json!({"decision": true})).unwrap();
        assert_eq!(bytes[..4], (payload.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..], payload.as_slice());
    }

    #[tokio::test]
    async fn decodes_hand_built_wire_bytes() {
        let bytes = wire(r#"{"player_id": 7}"#);
        let decoded = read_frame(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(decoded, json!({"player_id": 7}));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let mut bytes = wire(r#"{"decision": true}"#);
        bytes.truncate(bytes.len() - 3);
        let err = read_frame(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_prefix_is_an_error() {
        let bytes = [0u8, 0];
        let err = read_frame(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn non_json_payload_is_an_error() {
        let mut bytes = (3u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(b"{{{");
        let err = read_frame(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::Json(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected_before_allocating() {
        let bytes = (MAX_PAYLOAD_LEN + 1).to_be_bytes();
        let err = read_frame(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)), "got {err:?}");
    }
}
