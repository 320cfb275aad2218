//! Length-prefixed CBOR framing for the deal protocol stream.
//!
//! Wire format: `[len: u32 BE][cbor payload]`, one request and one
//! response per stream. Flush after every write so yamux pushes the
//! frame to the wire.

use std::io;

use futures::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum frame payload (1 MB). Deal messages are far smaller.
pub const MAX_FRAME_PAYLOAD: usize = 1024 * 1024;

pub async fn write_cbor_frame<T, W>(io: &mut W, msg: &T) -> io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload =
        serde_cbor::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload too large: {} > {}", payload.len(), MAX_FRAME_PAYLOAD),
        ));
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);

    io.write_all(&buf).await?;
    io.flush().await?;
    Ok(())
}

pub async fn read_cbor_frame<T, R>(io: &mut R) -> io::Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload too large: {} > {}", len, MAX_FRAME_PAYLOAD),
        ));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        io.read_exact(&mut payload).await?;
    }

    serde_cbor::from_slice(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
