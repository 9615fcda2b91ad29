// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the RPC channel.
//!
//! Framing: 4-byte length prefix (big-endian) + msgpack payload. Values use
//! msgpack with three extension types so mixed-version clusters stay
//! compatible:
//!
//! - ext 1: `Decimal` as a UTF-8 decimal literal
//! - ext 2: `UUID` as 16 raw bytes
//! - ext 3: enum as msgpack `[qualified_name, value]`
//!
//! Datetimes travel as ISO-8601 strings.

use rmpv::Value;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed extension payload for ext type {0}")]
    MalformedExt(i8),
}

/// Maximum message size (32 MB)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

pub const EXT_DECIMAL: i8 = 1;
pub const EXT_UUID: i8 = 2;
pub const EXT_ENUM: i8 = 3;

/// Wrap a `Decimal` as its wire extension value.
pub fn decimal_value(decimal: Decimal) -> Value {
    Value::Ext(EXT_DECIMAL, decimal.to_string().into_bytes())
}

/// Wrap a `Uuid` as its wire extension value.
pub fn uuid_value(uuid: Uuid) -> Value {
    Value::Ext(EXT_UUID, uuid.as_bytes().to_vec())
}

/// Wrap an enum as its wire extension value.
pub fn enum_value(qualified_name: &str, value: &str) -> Result<Value, WireError> {
    let payload = rmp_serde::to_vec(&(qualified_name, value))?;
    Ok(Value::Ext(EXT_ENUM, payload))
}

/// Unwrap a decimal extension value.
pub fn decimal_from_value(value: &Value) -> Result<Decimal, WireError> {
    match value {
        Value::Ext(EXT_DECIMAL, bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or(WireError::MalformedExt(EXT_DECIMAL)),
        _ => Err(WireError::MalformedExt(EXT_DECIMAL)),
    }
}

/// Unwrap a UUID extension value.
pub fn uuid_from_value(value: &Value) -> Result<Uuid, WireError> {
    match value {
        Value::Ext(EXT_UUID, bytes) => {
            let raw: [u8; 16] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| WireError::MalformedExt(EXT_UUID))?;
            Ok(Uuid::from_bytes(raw))
        }
        _ => Err(WireError::MalformedExt(EXT_UUID)),
    }
}

/// Unwrap an enum extension value into `(qualified_name, value)`.
pub fn enum_from_value(value: &Value) -> Result<(String, String), WireError> {
    match value {
        Value::Ext(EXT_ENUM, bytes) => {
            rmp_serde::from_slice(bytes).map_err(|_| WireError::MalformedExt(EXT_ENUM))
        }
        _ => Err(WireError::MalformedExt(EXT_ENUM)),
    }
}

/// Agent-side exception, wire-encoded for re-raising in the caller's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub exc_name: String,
    pub exc_repr: String,
    #[serde(default)]
    pub exc_args: Vec<String>,
    #[serde(default)]
    pub exc_tb: Option<String>,
}

/// Messages exchanged on an RPC connection after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcMessage {
    Call {
        call_id: u64,
        method: String,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    },
    Reply {
        call_id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ErrorRecord>,
    },
}

/// Encode a message to msgpack bytes (without length prefix).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let bytes = rmp_serde::to_vec_named(msg)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a message from msgpack bytes.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader.
pub async fn read_frame<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer.
pub async fn write_frame<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), WireError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
