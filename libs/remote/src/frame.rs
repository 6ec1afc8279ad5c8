//! Wire Framing
//!
//! One RPC message = one length-prefixed frame: a u32 big-endian byte count
//! followed by the bincode serialization of the tagged argument map. The
//! size cap bounds allocation on both sides; a frame over the cap is a
//! protocol violation, not a resource request.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use object::WireKwargs;

use crate::error::{RemoteError, Result};

/// Default maximum frame size (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Serialize and write one message frame.
pub async fn write_frame<W>(writer: &mut W, wire: &WireKwargs, max_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(wire)
        .map_err(|e| RemoteError::frame(format!("serialize failed: {}", e)))?;
    if data.len() > max_size {
        return Err(RemoteError::frame(format!(
            "outgoing frame of {} bytes exceeds cap of {}",
            data.len(),
            max_size
        )));
    }

    let mut buffer = BytesMut::with_capacity(4 + data.len());
    buffer.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&data);

    // Single write call, then flush for immediate transmission
    writer.write_all(&buffer).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and deserialize one message frame.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<WireKwargs>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_size {
        return Err(RemoteError::frame(format!(
            "incoming frame of {} bytes exceeds cap of {}",
            len, max_size
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    bincode::deserialize(&data).map_err(|e| RemoteError::frame(format!("deserialize failed: {}", e)))
}
