//! IPC protocol messages between the host client and a sandbox context.
//!
//! Uses length-prefixed rkyv messages over the worker's stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded envelope.
//!
//! Both blocking (`std::io`) and async (`tokio::io`) framing are provided:
//! the client and the worker use the async variants, the blocking ones are
//! handy for driving a worker from a plain thread or a test.

use std::fmt;
use std::io::{Read, Write};

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame either side will accept (16MB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Token matching a response to the request that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Id of the warm-up ping sent when a context is created.
    pub const WARMUP: &'static str = "handshake";

    /// Generate a fresh id, unique among all ids this process hands out.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The fixed id carried by the warm-up ping.
    pub fn warmup() -> Self {
        Self(Self::WARMUP.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request sent from the host to a context.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Request {
    pub id: CorrelationId,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum RequestKind {
    /// Ask whether the engine has finished bootstrapping.
    Ping,

    /// Execute a source snippet.
    Run {
        /// Untrusted source text, passed to the engine untouched.
        code: String,
    },
}

impl Request {
    pub fn ping(id: CorrelationId) -> Self {
        Self {
            id,
            kind: RequestKind::Ping,
        }
    }

    pub fn run(id: CorrelationId, code: impl Into<String>) -> Self {
        Self {
            id,
            kind: RequestKind::Run { code: code.into() },
        }
    }
}

/// Response sent from a context back to the host.
///
/// `id` always echoes the id of the request being answered.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Response {
    pub id: CorrelationId,
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ResponseKind {
    /// The engine is bootstrapped and can serve `Run` requests.
    Ready,

    /// The snippet ran to completion.
    Result {
        /// Captured standard output, verbatim.
        stdout: String,
        /// Captured standard error, verbatim.
        stderr: String,
    },

    /// The request could not be served.
    Failure {
        /// Human-readable message, passed through to the caller.
        message: String,
    },
}

impl Response {
    pub fn ready(id: CorrelationId) -> Self {
        Self {
            id,
            kind: ResponseKind::Ready,
        }
    }

    pub fn result(id: CorrelationId, stdout: String, stderr: String) -> Self {
        Self {
            id,
            kind: ResponseKind::Result { stdout, stderr },
        }
    }

    pub fn failure(id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: ResponseKind::Failure {
                message: message.into(),
            },
        }
    }
}

fn encode(
    message: &impl for<'a> Serialize<
        HighSerializer<AlignedVec, ArenaHandle<'a>, rkyv::rancor::Error>,
    >,
) -> Result<AlignedVec> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    if bytes.len() > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!(
            "IPC message too large: {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes)
}

fn frame_len(len_bytes: [u8; 4]) -> Result<usize> {
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }
    Ok(len)
}

fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, HighDeserializer<rkyv::rancor::Error>>,
{
    // Validated: the peer hosts untrusted code.
    rkyv::from_bytes::<T, rkyv::rancor::Error>(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        HighSerializer<AlignedVec, ArenaHandle<'a>, rkyv::rancor::Error>,
    >,
) -> Result<()> {
    let bytes = encode(message)?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, HighDeserializer<rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = frame_len(len_bytes)?;

    let mut bytes = AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode(&bytes)
}

/// Async counterpart of [`write_message`].
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        HighSerializer<AlignedVec, ArenaHandle<'a>, rkyv::rancor::Error>,
    >,
) -> Result<()> {
    let bytes = encode(message)?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Async counterpart of [`read_message`].
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, HighDeserializer<rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Ipc(format!(
                "Failed to read IPC message length: {}",
                e
            )));
        }
    }
    let len = frame_len(len_bytes)?;

    let mut bytes = AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode(&bytes).map(Some)
}
