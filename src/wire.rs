//! Transfer wire codec
//!
//! Frames the metadata exchanged before a file's payload bytes flow:
//! a header frame (4-byte big-endian length prefix followed by a JSON
//! body) and a fixed-size acknowledgment token.
//!
//! The codec is generic over [`AsyncRead`]/[`AsyncWrite`] so the sender
//! and receiver state machines can be exercised over in-memory duplex
//! streams instead of real sockets.
//!
//! ## Frame sequence per connection
//!
//! 1. Header: `{filename, filesize, resumeOffset}` — self-delimiting
//! 2. Acknowledgment: `READY` or `ERROR`, receiver to sender
//! 3. Payload: exactly `filesize - resumeOffset` raw bytes, no framing

use crate::{Result, ShuttleError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted header frame body, in bytes
pub const MAX_HEADER_LEN: usize = 4096;

/// Acknowledgment token sent when the receiver is ready for payload bytes
const ACK_READY: &[u8; 5] = b"READY";

/// Acknowledgment token sent when the receiver rejects the transfer
const ACK_ERROR: &[u8; 5] = b"ERROR";

/// Metadata exchanged before streaming a file
///
/// # Examples
///
/// ```
/// use lan_shuttle_protocol::WireHeader;
///
/// let header = WireHeader::new("photo.jpg", 1048576);
/// assert_eq!(header.resume_offset, 0);
/// assert_eq!(header.remaining(), 1048576);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHeader {
    /// File name, basename only, no path separators
    pub filename: String,

    /// Total file size in bytes
    pub filesize: u64,

    /// Byte count already transferred in a prior attempt (0 = fresh transfer)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resume_offset: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl WireHeader {
    /// Create a header for a fresh transfer
    pub fn new(filename: impl Into<String>, filesize: u64) -> Self {
        Self {
            filename: filename.into(),
            filesize,
            resume_offset: 0,
        }
    }

    /// Create a header resuming from a prior partial transfer
    pub fn with_resume(filename: impl Into<String>, filesize: u64, resume_offset: u64) -> Self {
        Self {
            filename: filename.into(),
            filesize,
            resume_offset,
        }
    }

    /// Payload bytes still to be streamed for this transfer
    pub fn remaining(&self) -> u64 {
        self.filesize.saturating_sub(self.resume_offset)
    }

    /// Check the invariants a header must satisfy on both ends.
    ///
    /// Filenames must be non-empty basenames; the resume offset can
    /// never exceed the declared size.
    fn validate(&self) -> Result<()> {
        if self.filename.is_empty() {
            return Err(ShuttleError::MalformedHeader("empty filename".to_string()));
        }
        if self.filename.contains('/') || self.filename.contains('\\') {
            return Err(ShuttleError::MalformedHeader(format!(
                "filename contains path separator: {}",
                self.filename
            )));
        }
        if self.resume_offset > self.filesize {
            return Err(ShuttleError::MalformedHeader(format!(
                "resume offset {} exceeds declared size {}",
                self.resume_offset, self.filesize
            )));
        }
        Ok(())
    }
}

/// Encode and write one header frame.
///
/// The frame is a 4-byte big-endian length prefix followed by the JSON
/// body. Invalid headers (path separators, offset past the declared
/// size, body over [`MAX_HEADER_LEN`]) are rejected before any byte is
/// written.
pub async fn write_header<W>(stream: &mut W, header: &WireHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    header.validate()?;

    let body = serde_json::to_vec(header)?;
    if body.len() > MAX_HEADER_LEN {
        return Err(ShuttleError::MalformedHeader(format!(
            "header body {} bytes exceeds maximum {}",
            body.len(),
            MAX_HEADER_LEN
        )));
    }

    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and decode exactly one header frame.
///
/// # Errors
///
/// Returns [`ShuttleError::Truncated`] if the peer closes before a full
/// frame arrives, [`ShuttleError::MalformedHeader`] if the frame cannot
/// be parsed or violates header invariants.
pub async fn read_header<R>(stream: &mut R) -> Result<WireHeader>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_or_truncated(stream, &mut len_buf).await?;
    let body_len = u32::from_be_bytes(len_buf) as usize;

    if body_len == 0 || body_len > MAX_HEADER_LEN {
        return Err(ShuttleError::MalformedHeader(format!(
            "header length prefix {body_len} out of range"
        )));
    }

    let mut body = vec![0u8; body_len];
    read_exact_or_truncated(stream, &mut body).await?;

    let header: WireHeader = serde_json::from_slice(&body)
        .map_err(|e| ShuttleError::MalformedHeader(e.to_string()))?;
    header.validate()?;
    Ok(header)
}

/// Write the fixed-size acknowledgment token
pub async fn write_ack<W>(stream: &mut W, ok: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let token = if ok { ACK_READY } else { ACK_ERROR };
    stream.write_all(token).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the fixed-size acknowledgment token.
///
/// # Errors
///
/// Returns [`ShuttleError::UnexpectedAck`] if the bytes match neither
/// recognized token, [`ShuttleError::Truncated`] on early EOF.
pub async fn read_ack<R>(stream: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 5];
    read_exact_or_truncated(stream, &mut buf).await?;

    match &buf {
        ACK_READY => Ok(true),
        ACK_ERROR => Ok(false),
        _ => Err(ShuttleError::UnexpectedAck),
    }
}

async fn read_exact_or_truncated<R>(stream: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ShuttleError::Truncated
        } else {
            ShuttleError::Io(e)
        }
    })?;
    Ok(())
}
