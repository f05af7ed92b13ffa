//! Length-prefixed frame codec.
//!
//! Every frame is a 4-byte big-endian payload length followed by exactly
//! that many bytes of UTF-8 JSON. Seed batches delivered at registration can
//! be large, so the accepted payload size is generous; anything beyond
//! [`MAX_FRAME_BYTES`] is treated as a protocol violation rather than an
//! allocation request.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload (256 MiB).
pub const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

/// A framing failure. All variants are fatal to the connection they occurred
/// on, never to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer closed the connection before a complete frame arrived.
    #[error("connection closed mid-frame")]
    ConnectionClosed,

    /// The header declared a payload larger than [`MAX_FRAME_BYTES`].
    #[error("declared frame length {declared} exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Length declared by the peer.
        declared: u32,
        /// The accepted maximum.
        max: u32,
    },

    /// The payload was not the expected JSON document.
    #[error("malformed frame payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The underlying transport failed.
    #[error("frame i/o: {0}")]
    Io(#[from] std::io::Error),
}

fn map_read_err(e: std::io::Error) -> Error {
    // read_exact reports a peer that went away as UnexpectedEof
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// Read one frame payload, looping until the declared length has been
/// consumed or the peer closes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(map_read_err)?;

    let declared = u32::from_be_bytes(header);
    if declared > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            declared,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0u8; declared as usize];
    reader.read_exact(&mut payload).await.map_err(map_read_err)?;
    Ok(payload)
}

/// Write one frame: header then payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        declared: u32::MAX,
        max: MAX_FRAME_BYTES,
    })?;
    if len > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            declared: len,
            max: MAX_FRAME_BYTES,
        });
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode its JSON payload into `T`.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, Error>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Encode `message` as JSON and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"hola").await.unwrap();
        let got = read_frame(&mut server).await.unwrap();
        assert_eq!(got, b"hola");
    }

    #[tokio::test]
    async fn message_round_trip_preserves_object_tree() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let tree = json!({
            "tipoOperacion": "TRANSFERIR_FONDOS",
            "parametros": {
                "ID_CUENTA_ORIGEN": 100001,
                "MONTO": 500.5,
                "anidado": {"lista": [1, 2.5, "tres", null, true]},
            },
        });

        write_message(&mut client, &tree).await.unwrap();
        let got: Value = read_message(&mut server).await.unwrap();
        assert_eq!(got, tree);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_allocating() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Hand-roll a header declaring more than the limit.
        let declared = MAX_FRAME_BYTES + 1;
        tokio::io::AsyncWriteExt::write_all(&mut client, &declared.to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { .. }), "{err}");
    }

    #[tokio::test]
    async fn short_header_read_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8, 0])
            .await
            .unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed), "{err}");
    }

    #[tokio::test]
    async fn short_body_read_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Declare ten bytes but deliver three.
        tokio::io::AsyncWriteExt::write_all(&mut client, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"abc")
            .await
            .unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed), "{err}");
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_frame(&mut client, b"not json at all").await.unwrap();
        let err = read_message::<_, Value>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)), "{err}");
    }
}
