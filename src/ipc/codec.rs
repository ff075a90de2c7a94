//! Length-prefixed, versioned framing for untrusted byte streams.
//!
//! ```text
//! [length: u32 BE][version: u16 BE][payload: length bytes]
//! ```
//!
//! # Security
//! - The header is validated before any payload buffer exists: a declared
//!   length above `max_message_bytes` is rejected without allocating or
//!   reading further
//! - Versions below `min_version` fail with `UnsupportedVersion`
//! - Truncated headers, truncated payloads and trailing bytes are `Malformed`

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{
    ProtocolError, ProtocolVersion, CURRENT_PROTOCOL_VERSION, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_MIN_PROTOCOL_VERSION,
};
use super::server::ServerError;

/// Bytes in the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 6;

/// Smallest frame cap accepted by configuration.
pub const MIN_MAX_MESSAGE_BYTES: usize = 4096;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    /// Negotiated version: the requested one, capped at CURRENT.
    pub version: ProtocolVersion,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub payload: Vec<u8>,
}

/// Frame encoder/decoder holding the size cap and downgrade floor.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_bytes: usize,
    min_version: ProtocolVersion,
}

impl FrameCodec {
    pub fn new(max_message_bytes: usize, min_version: ProtocolVersion) -> Self {
        Self {
            max_message_bytes,
            min_version,
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    pub fn min_version(&self) -> ProtocolVersion {
        self.min_version
    }

    /// Pick the version for a peer. `None` means "whatever you speak".
    /// Requests above CURRENT are answered at CURRENT; requests below the
    /// floor are refused.
    pub fn negotiate(
        &self,
        requested: Option<ProtocolVersion>,
    ) -> Result<ProtocolVersion, ProtocolError> {
        let requested = requested.unwrap_or(CURRENT_PROTOCOL_VERSION);
        if requested < self.min_version {
            return Err(ProtocolError::UnsupportedVersion {
                requested: requested.as_u16(),
                minimum: self.min_version.as_u16(),
            });
        }
        Ok(requested.min(CURRENT_PROTOCOL_VERSION))
    }

    /// Validate the 6-byte header. Only the first six bytes are inspected.
    pub fn decode_header(&self, bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::Malformed("truncated frame header".into()));
        }
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let requested = ProtocolVersion(u16::from_be_bytes([bytes[4], bytes[5]]));

        if length as usize > self.max_message_bytes {
            return Err(ProtocolError::MessageTooLarge {
                size: length as usize,
                max: self.max_message_bytes,
            });
        }
        let version = self.negotiate(Some(requested))?;
        Ok(FrameHeader { length, version })
    }

    /// Decode exactly one frame from `raw`.
    pub fn decode_frame(&self, raw: &[u8]) -> Result<Frame, ProtocolError> {
        let header = self.decode_header(raw)?;
        let body = &raw[FRAME_HEADER_LEN..];
        let length = header.length as usize;

        if body.len() < length {
            return Err(ProtocolError::Malformed("truncated payload".into()));
        }
        if body.len() > length {
            return Err(ProtocolError::Malformed("trailing bytes after frame".into()));
        }
        Ok(Frame {
            version: header.version,
            payload: body.to_vec(),
        })
    }

    /// Serialize a frame. Payloads above the cap are refused.
    pub fn encode_frame(
        &self,
        version: ProtocolVersion,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let length = self.checked_length(payload)?;
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&version.as_u16().to_be_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Read one frame. The payload buffer is allocated only after the header
    /// passed validation. A clean EOF before any header byte yields `None`.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>, ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_buf = [0u8; FRAME_HEADER_LEN];
        let first = reader.read(&mut header_buf).await?;
        if first == 0 {
            return Ok(None);
        }
        if first < FRAME_HEADER_LEN {
            reader
                .read_exact(&mut header_buf[first..])
                .await
                .map_err(truncated)?;
        }

        let header = self.decode_header(&header_buf)?;
        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload).await.map_err(truncated)?;

        Ok(Some(Frame {
            version: header.version,
            payload,
        }))
    }

    /// Write one frame and flush.
    pub async fn write_frame<W>(
        &self,
        writer: &mut W,
        version: ProtocolVersion,
        payload: &[u8],
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let length = self.checked_length(payload)?;
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[..4].copy_from_slice(&length.to_be_bytes());
        header[4..].copy_from_slice(&version.as_u16().to_be_bytes());

        writer.write_all(&header).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    fn checked_length(&self, payload: &[u8]) -> Result<u32, ProtocolError> {
        if payload.len() > self.max_message_bytes {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_bytes,
            });
        }
        u32::try_from(payload.len()).map_err(|_| ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MIN_PROTOCOL_VERSION)
    }
}

/// EOF inside a frame is a protocol violation, not a disconnect.
fn truncated(e: std::io::Error) -> ServerError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ServerError::Protocol(ProtocolError::Malformed("truncated frame".into()))
    } else {
        ServerError::Io(e)
    }
}
