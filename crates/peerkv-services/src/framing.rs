//! Length-prefixed message frames over any async byte stream.
//!
//! The same helpers drive the TLS channel to the server and the plain
//! channel between peers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use peerkv_core::wire::{self, FRAME_HEADER_LEN};

use crate::network::TransportError;

/// Encode `msg` and write it as one frame.
pub async fn write_message<W, T>(stream: &mut W, msg: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = wire::encode_frame(msg)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header arrives.
pub async fn read_message<R, T>(stream: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = wire::frame_len(header)?;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(wire::decode(&body)?))
}
