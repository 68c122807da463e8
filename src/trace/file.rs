//! On-disk framing of archive files.
//!
//! Every event and definition file of an archive starts with a fixed header
//! and is followed by frames. A frame holds one flushed chunk; a chunk is a
//! run of length-prefixed MessagePack records.
//!
//! # File Format
//!
//! ```text
//! +--------------------+
//! | Magic (8 bytes)    |  "HPCTRACE"
//! +--------------------+
//! | Version (2 bytes)  |  u16 little-endian
//! +--------------------+
//! | Flags (2 bytes)    |  u16 little-endian (bit 0 = compressed)
//! +--------------------+
//! | File type (1 byte) |  0=events, 1=local defs, 2=global defs
//! +--------------------+
//! | Compression (1 b)  |  u8 (0=none, 1=lz4)
//! +--------------------+
//! | Location (8 bytes) |  u64 little-endian global id, 0 for global defs
//! +--------------------+
//! | Frame*             |
//! +--------------------+
//!
//! Frame:
//! +--------------------+
//! | Raw len (4 bytes)  |  u32, uncompressed size
//! +--------------------+
//! | Stored len (4 b)   |  u32, size of the bytes that follow
//! +--------------------+
//! | Bytes              |  chunk, LZ4 block with prepended size if compressed
//! +--------------------+
//!
//! Chunk:
//! +--------------------+
//! | Len (4 bytes)      |  u32 record length
//! | Record (msgpack)   |
//! +--------------------+  (repeated)
//! ```

use std::io;

use libc::ENOSPC;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::flush::FileType;
use crate::error::{Error, ErrorKind};
use crate::tracing_compat::warn;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes at the start of every archive file.
pub const ARCHIVE_MAGIC: &[u8; 8] = b"HPCTRACE";

/// Current file format version.
pub const ARCHIVE_VERSION: u16 = 1;

/// Flag: frames are LZ4 compressed.
pub const FLAG_COMPRESSED: u16 = 0x0001;

/// Header size (magic + version + flags + file type + compression + location).
pub const HEADER_SIZE: usize = 8 + 2 + 2 + 1 + 1 + 8;

/// Size of a frame header.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Size of the length prefix of a record inside a chunk.
pub const RECORD_PREFIX_SIZE: usize = 4;

// =============================================================================
// Compression
// =============================================================================

/// Compression of archive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Frames are stored as written.
    #[default]
    None,
    /// Frames are LZ4 block-compressed.
    #[cfg(feature = "trace-compression")]
    Lz4,
}

impl CompressionMode {
    /// Returns true if this mode compresses frames.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        match self {
            Self::None => false,
            #[cfg(feature = "trace-compression")]
            Self::Lz4 => true,
        }
    }

    /// The compression used when compression is requested, if built in.
    #[must_use]
    pub const fn enabled() -> Self {
        #[cfg(feature = "trace-compression")]
        {
            Self::Lz4
        }
        #[cfg(not(feature = "trace-compression"))]
        {
            Self::None
        }
    }

    const fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            #[cfg(feature = "trace-compression")]
            Self::Lz4 => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, ArchiveError> {
        match byte {
            0 => Ok(Self::None),
            #[cfg(feature = "trace-compression")]
            1 => Ok(Self::Lz4),
            #[cfg(not(feature = "trace-compression"))]
            1 => Err(ArchiveError::CompressionNotAvailable),
            other => Err(ArchiveError::UnsupportedCompression(other)),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors reading or writing archive files.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error of the file substrate.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic bytes in a file header.
    #[error("invalid magic bytes: not an archive file")]
    InvalidMagic,

    /// Unsupported file format version.
    #[error("unsupported file version: expected <= {expected}, found {found}")]
    UnsupportedVersion {
        /// Maximum supported version.
        expected: u16,
        /// Found version.
        found: u16,
    },

    /// Unknown file type byte.
    #[error("unknown file type: {0}")]
    UnknownFileType(u8),

    /// Unsupported compression format.
    #[error("unsupported compression format: {0}")]
    UnsupportedCompression(u8),

    /// Compression not available (feature not enabled).
    #[error("file is compressed but trace-compression feature is not enabled")]
    CompressionNotAvailable,

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// The file ends inside a header, frame or record.
    #[error("file truncated")]
    Truncated,

    /// A file the anchor lists is absent.
    #[error("missing archive file: {0}")]
    Missing(String),

    /// The anchor file is malformed.
    #[error("anchor error: {0}")]
    Anchor(#[from] serde_json::Error),
}

/// Result type for framing operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

pub(crate) fn is_disk_full(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ENOSPC)
}

impl From<ArchiveError> for Error {
    fn from(err: ArchiveError) -> Self {
        let kind = match &err {
            ArchiveError::Io(io_err) => {
                if is_disk_full(io_err) {
                    warn!("archive write failed: disk full (ENOSPC)");
                }
                ErrorKind::ArchiveIo
            }
            ArchiveError::Missing(_) => ErrorKind::ArchiveIo,
            _ => ErrorKind::ArchiveFormat,
        };
        let message = err.to_string();
        Self::new(kind).with_message(message).with_source(err)
    }
}

// =============================================================================
// Header
// =============================================================================

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u16,
    /// What the file holds.
    pub file_type: FileType,
    /// Frame compression.
    pub compression: CompressionMode,
    /// Global id of the location the file belongs to.
    pub location: u64,
}

impl FileHeader {
    /// A current-version header.
    #[must_use]
    pub const fn new(file_type: FileType, compression: CompressionMode, location: u64) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            file_type,
            compression,
            location,
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        let flags = if self.compression.is_compressed() {
            FLAG_COMPRESSED
        } else {
            0
        };
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.push(self.file_type.to_byte());
        out.push(self.compression.to_byte());
        out.extend_from_slice(&self.location.to_le_bytes());
        out
    }

    /// Decodes a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> ArchiveResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ArchiveError::Truncated);
        }
        if &bytes[..8] != ARCHIVE_MAGIC {
            return Err(ArchiveError::InvalidMagic);
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version > ARCHIVE_VERSION {
            return Err(ArchiveError::UnsupportedVersion {
                expected: ARCHIVE_VERSION,
                found: version,
            });
        }
        let file_type =
            FileType::from_byte(bytes[12]).ok_or(ArchiveError::UnknownFileType(bytes[12]))?;
        let compression = CompressionMode::from_byte(bytes[13])?;
        let mut location = [0_u8; 8];
        location.copy_from_slice(&bytes[14..22]);
        Ok(Self {
            version,
            file_type,
            compression,
            location: u64::from_le_bytes(location),
        })
    }
}

// =============================================================================
// Frames
// =============================================================================

fn read_u32(bytes: &[u8], at: usize) -> ArchiveResult<u32> {
    let slice = bytes.get(at..at + 4).ok_or(ArchiveError::Truncated)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Encodes one chunk as a frame.
#[must_use]
pub fn encode_frame(raw: &[u8], compression: CompressionMode) -> Vec<u8> {
    let stored: Option<Vec<u8>> = match compression {
        CompressionMode::None => None,
        #[cfg(feature = "trace-compression")]
        CompressionMode::Lz4 => Some(lz4_flex::compress_prepend_size(raw)),
    };
    let body = stored.as_deref().unwrap_or(raw);
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    out.extend_from_slice(&len_u32(raw.len()).to_le_bytes());
    out.extend_from_slice(&len_u32(body.len()).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Splits the frames of a file body (after the header) into chunks.
pub fn decode_frames(body: &[u8], compression: CompressionMode) -> ArchiveResult<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    let mut at = 0;
    while at < body.len() {
        let raw_len = read_u32(body, at)? as usize;
        let stored_len = read_u32(body, at + 4)? as usize;
        at += FRAME_HEADER_SIZE;
        let stored = body.get(at..at + stored_len).ok_or(ArchiveError::Truncated)?;
        at += stored_len;
        let raw = match compression {
            CompressionMode::None => stored.to_vec(),
            #[cfg(feature = "trace-compression")]
            CompressionMode::Lz4 => lz4_flex::decompress_size_prepended(stored)
                .map_err(|e| ArchiveError::Decompression(e.to_string()))?,
        };
        if raw.len() != raw_len {
            return Err(ArchiveError::Decompression(format!(
                "frame expands to {} bytes, header says {raw_len}",
                raw.len()
            )));
        }
        chunks.push(raw);
    }
    Ok(chunks)
}

// =============================================================================
// Records
// =============================================================================

/// Appends one length-prefixed record to `out`.
///
/// The record is serialized straight into `out` and the prefix patched
/// afterwards, so a reused `out` with enough capacity never allocates.
pub fn encode_record<T: Serialize>(record: &T, out: &mut Vec<u8>) -> crate::error::Result<()> {
    let start = out.len();
    out.extend_from_slice(&[0; RECORD_PREFIX_SIZE]);
    if let Err(err) = rmp_serde::encode::write(out, record) {
        out.truncate(start);
        return Err(err.into());
    }
    let len = len_u32(out.len() - start - RECORD_PREFIX_SIZE);
    out[start..start + RECORD_PREFIX_SIZE].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Decodes every record of a chunk.
pub fn decode_records<T: DeserializeOwned>(chunk: &[u8]) -> crate::error::Result<Vec<T>> {
    let mut records = Vec::new();
    let mut at = 0;
    while at < chunk.len() {
        let len = read_u32(chunk, at)? as usize;
        at += RECORD_PREFIX_SIZE;
        let bytes = chunk.get(at..at + len).ok_or(ArchiveError::Truncated)?;
        records.push(rmp_serde::from_slice(bytes)?);
        at += len;
    }
    Ok(records)
}
