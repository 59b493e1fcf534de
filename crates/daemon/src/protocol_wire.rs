// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the runner duplex channel.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! The first frame from a runner must be `Hello`.

use laf_core::{RunnerMsg, ServerMsg};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("First frame must be hello")]
    ExpectedHello,
}

/// Maximum message size (16 MB; log batches and diffs stay well under)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// How long a fresh connection has to present its hello frame.
pub const HELLO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Encode a message to JSON bytes (without length prefix)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;

    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(json)
}

/// Decode a message from wire format
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader
pub async fn read_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    // Read length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    // Read payload
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer
pub async fn write_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let len = data.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one runner frame.
pub async fn read_runner_msg<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<RunnerMsg, ProtocolError> {
    let bytes = read_message(reader).await?;
    decode(&bytes)
}

/// Read the mandatory first frame, bounded by [`HELLO_TIMEOUT`].
pub async fn read_hello<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<laf_core::RunnerHello, ProtocolError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, read_runner_msg(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    match msg {
        RunnerMsg::Hello(hello) => Ok(hello),
        _ => Err(ProtocolError::ExpectedHello),
    }
}

/// Write one server frame.
pub async fn write_server_msg<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &ServerMsg,
) -> Result<(), ProtocolError> {
    let data = encode(msg)?;
    write_message(writer, &data).await
}

#[cfg(test)]
#[path = "protocol_wire_tests.rs"]
mod tests;
