//! Minicap frame stream protocol
//!
//! A connection starts with a fixed 24-byte little-endian header, followed by
//! a sequence of `{length: u32, payload: length bytes}` records, each payload
//! being one still image.
//!
//! ```text
//! offset  size  field
//!      0     1  version
//!      1     1  reserved
//!      2     4  pid
//!      6     4  real width
//!     10     4  real height
//!     14     4  virtual width
//!     18     4  virtual height
//!     22     1  orientation (0..=3)
//!     23     1  reserved
//! ```

use crate::display::Orientation;
use crate::frame::{FrameImage, ImageCodec};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Size of the stream header in bytes
pub const HEADER_LENGTH: usize = 24;

/// Size of a frame length prefix in bytes
pub const LENGTH_PREFIX: usize = 4;

pub type HeaderBytes = [u8; HEADER_LENGTH];

/// Header sent once by the agent at the start of each connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStreamHeader {
    pub version: u8,
    pub pid: u32,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub orientation: Orientation,
    pub reserved: [u8; 2],
}

impl FrameStreamHeader {
    pub fn to_bytes(&self) -> HeaderBytes {
        let mut bytes: HeaderBytes = [0; HEADER_LENGTH];
        bytes[0] = self.version;
        bytes[1] = self.reserved[0];
        bytes[2..6].copy_from_slice(&self.pid.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.real_width.to_le_bytes());
        bytes[10..14].copy_from_slice(&self.real_height.to_le_bytes());
        bytes[14..18].copy_from_slice(&self.virtual_width.to_le_bytes());
        bytes[18..22].copy_from_slice(&self.virtual_height.to_le_bytes());
        bytes[22] = self.orientation.code() as u8;
        bytes[23] = self.reserved[1];
        bytes
    }

    pub fn from_bytes(bytes: &HeaderBytes) -> Result<Self> {
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };

        let orientation = Orientation::from_code(bytes[22] as u32)
            .map_err(|_| Error::Protocol(format!("invalid orientation code {}", bytes[22])))?;

        let header = Self {
            version: bytes[0],
            pid: u32_at(2),
            real_width: u32_at(6),
            real_height: u32_at(10),
            virtual_width: u32_at(14),
            virtual_height: u32_at(18),
            orientation,
            reserved: [bytes[1], bytes[23]],
        };

        if header.version == 0 {
            return Err(Error::Protocol("protocol version 0".into()));
        }
        if header.virtual_width == 0 || header.virtual_height == 0 {
            return Err(Error::Protocol(format!(
                "empty virtual display {}x{}",
                header.virtual_width, header.virtual_height
            )));
        }

        Ok(header)
    }
}

/// Read and validate the stream header.
///
/// A short read is a protocol error; the connection must then be discarded.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<FrameStreamHeader> {
    let mut bytes: HeaderBytes = [0; HEADER_LENGTH];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Protocol(format!("short header read: {}", e)))?;
    FrameStreamHeader::from_bytes(&bytes)
}

/// Sequential reader of length-prefixed frame records on one connection
pub struct FrameReader<R> {
    reader: R,
    codec: Arc<dyn ImageCodec>,
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader positioned right after the stream header
    pub fn new(reader: R, codec: Arc<dyn ImageCodec>, max_frame_size: u32) -> Self {
        Self {
            reader,
            codec,
            max_frame_size,
        }
    }

    /// Read the header off `reader`, then hand back a frame reader for the rest
    pub async fn handshake(
        mut reader: R,
        codec: Arc<dyn ImageCodec>,
        max_frame_size: u32,
    ) -> Result<(FrameStreamHeader, Self)> {
        let header = read_header(&mut reader).await?;
        Ok((header, Self::new(reader, codec, max_frame_size)))
    }

    /// Read the next raw payload.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a record boundary.
    /// Reads never go past the declared length, so a failed record leaves the
    /// next length prefix untouched.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        if self.reader.read(&mut prefix[..1]).await? == 0 {
            return Ok(None);
        }
        self.reader
            .read_exact(&mut prefix[1..])
            .await
            .map_err(|e| Error::FrameDecode(format!("truncated length prefix: {}", e)))?;

        let length = u32::from_le_bytes(prefix);
        if length > self.max_frame_size {
            return Err(Error::FrameDecode(format!(
                "frame too large: {} bytes (max {})",
                length, self.max_frame_size
            )));
        }

        let mut payload = Vec::with_capacity(length as usize);
        (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut payload)
            .await?;

        if payload.len() < length as usize {
            return Err(Error::FrameDecode(format!(
                "truncated payload: expected {} bytes, got {}",
                length,
                payload.len()
            )));
        }

        trace!("Read frame payload: {} bytes", length);
        Ok(Some(Bytes::from(payload)))
    }

    /// Read and decode the next image
    pub async fn next_image(&mut self) -> Result<Option<Arc<dyn FrameImage>>> {
        match self.next_payload().await? {
            Some(payload) => self.codec.decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}
