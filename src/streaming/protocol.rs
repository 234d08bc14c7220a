//! Binary frame codec for media uploads.
//!
//! Two frame kinds share a leading `i32` discriminant. Every multi-byte
//! integer is big-endian and signed, because the server reads the frames
//! with signed accessors. Text fields are `i32` length-prefixed UTF-8.
//!
//! ```text
//! WHOLE_FILE (1): kind:i32 | name_len:i32 name | type_len:i32 type | size:i64 | content
//! CHUNK (2):      kind:i32 | transfer_id[36] | name_len:i32 name | type_len:i32 type
//!                 | total_size:i64 | index:i32 | total:i32 | content..EOF
//! ```
//!
//! The chunk content has no length field: a frame is one WebSocket message,
//! so the transport already delimits it.

use crate::error::{Result, UploadError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use uuid::Uuid;

/// Length of a canonical hyphenated UUID rendering. The chunk frame carries
/// the transfer id without a length prefix, so this is fixed by the protocol.
pub const TRANSFER_ID_LEN: usize = 36;

/// Fixed bytes of a whole-file frame: kind + two length prefixes + size.
pub const WHOLE_FILE_HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Fixed bytes of a chunk frame: kind + id + two length prefixes + size + index + total.
pub const CHUNK_HEADER_LEN: usize = 4 + TRANSFER_ID_LEN + 4 + 4 + 8 + 4 + 4;

// =============================================================================
// Frame Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FrameKind {
    WholeFile = 1,
    Chunk = 2,
}

impl FrameKind {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(Self::WholeFile),
            2 => Some(Self::Chunk),
            _ => None,
        }
    }
}

// =============================================================================
// Transfer Identifier
// =============================================================================

/// Per-file token that ties all chunk frames of one logical file together.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId([u8; TRANSFER_ID_LEN]);

impl TransferId {
    /// Fresh random (v4) identifier.
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        let mut buf = [0u8; TRANSFER_ID_LEN];
        uuid.hyphenated().encode_lower(&mut buf);
        Self(buf)
    }

    /// Accepts exactly the 36 wire bytes of a hyphenated UUID.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TRANSFER_ID_LEN {
            return Err(UploadError::MalformedFrame(format!(
                "transfer id must be {} bytes, got {}",
                TRANSFER_ID_LEN,
                bytes.len()
            )));
        }
        Uuid::try_parse_ascii(bytes).map_err(|e| {
            UploadError::MalformedFrame(format!("transfer id is not a UUID: {}", e))
        })?;
        let mut buf = [0u8; TRANSFER_ID_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; TRANSFER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self)
    }
}

// =============================================================================
// WHOLE_FILE (1)
// =============================================================================

/// Single-frame upload of a file at or below the chunk threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WholeFileFrame {
    pub filename: String,
    pub content_type: String,
    pub content: Bytes,
}

impl WholeFileFrame {
    pub fn encoded_len(&self) -> usize {
        WHOLE_FILE_HEADER_LEN + self.filename.len() + self.content_type.len() + self.content.len()
    }

    pub fn encode(&self) -> Result<Bytes> {
        let name_len = wire_len("filename", self.filename.len())?;
        let type_len = wire_len("content_type", self.content_type.len())?;
        let size = wire_size("file_size", self.content.len() as u64)?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i32(FrameKind::WholeFile as i32);
        buf.put_i32(name_len);
        buf.put_slice(self.filename.as_bytes());
        buf.put_i32(type_len);
        buf.put_slice(self.content_type.as_bytes());
        buf.put_i64(size);
        buf.put_slice(&self.content);

        debug_assert_eq!(buf.len(), self.encoded_len());
        Ok(buf.freeze())
    }

    /// Decode the body that follows the kind field.
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let filename = get_string(&mut body, "filename")?;
        let content_type = get_string(&mut body, "content_type")?;

        require(&body, 8, "file_size")?;
        let size = body.get_i64();
        if size < 0 {
            return Err(UploadError::MalformedFrame(format!(
                "negative file size {}",
                size
            )));
        }
        let size = size as u64;
        if (body.remaining() as u64) < size {
            return Err(UploadError::TruncatedFrame {
                field: "content",
                needed: usize::try_from(size).unwrap_or(usize::MAX),
                available: body.remaining(),
            });
        }
        let content = body.split_to(size as usize);
        if body.has_remaining() {
            return Err(UploadError::MalformedFrame(format!(
                "{} trailing bytes after file content",
                body.remaining()
            )));
        }

        Ok(Self {
            filename,
            content_type,
            content,
        })
    }
}

// =============================================================================
// CHUNK (2)
// =============================================================================

/// One piece of a file larger than the chunk threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub transfer_id: TransferId,
    pub filename: String,
    pub content_type: String,
    /// Size of the whole logical file, identical across its chunks
    pub total_size: u64,
    /// 1-based
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub content: Bytes,
}

impl ChunkFrame {
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.filename.len() + self.content_type.len() + self.content.len()
    }

    pub fn encode(&self) -> Result<Bytes> {
        let name_len = wire_len("filename", self.filename.len())?;
        let type_len = wire_len("content_type", self.content_type.len())?;
        let total_size = wire_size("total_size", self.total_size)?;
        let chunk_index = wire_len("chunk_index", self.chunk_index as usize)?;
        let total_chunks = wire_len("total_chunks", self.total_chunks as usize)?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i32(FrameKind::Chunk as i32);
        buf.put_slice(self.transfer_id.as_bytes());
        buf.put_i32(name_len);
        buf.put_slice(self.filename.as_bytes());
        buf.put_i32(type_len);
        buf.put_slice(self.content_type.as_bytes());
        buf.put_i64(total_size);
        buf.put_i32(chunk_index);
        buf.put_i32(total_chunks);
        buf.put_slice(&self.content);

        debug_assert_eq!(buf.len(), self.encoded_len());
        Ok(buf.freeze())
    }

    /// Decode the body that follows the kind field.
    pub fn decode(mut body: Bytes) -> Result<Self> {
        require(&body, TRANSFER_ID_LEN, "transfer_id")?;
        let transfer_id = TransferId::from_bytes(&body.split_to(TRANSFER_ID_LEN))?;

        let filename = get_string(&mut body, "filename")?;
        let content_type = get_string(&mut body, "content_type")?;

        require(&body, 8 + 4 + 4, "chunk header")?;
        let total_size = body.get_i64();
        let chunk_index = body.get_i32();
        let total_chunks = body.get_i32();

        if total_size < 0 {
            return Err(UploadError::MalformedFrame(format!(
                "negative total size {}",
                total_size
            )));
        }
        if total_chunks < 1 || chunk_index < 1 || chunk_index > total_chunks {
            return Err(UploadError::MalformedFrame(format!(
                "chunk index {} out of range 1..={}",
                chunk_index, total_chunks
            )));
        }

        Ok(Self {
            transfer_id,
            filename,
            content_type,
            total_size: total_size as u64,
            chunk_index: chunk_index as u32,
            total_chunks: total_chunks as u32,
            content: body,
        })
    }
}

// =============================================================================
// Frame
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    WholeFile(WholeFileFrame),
    Chunk(ChunkFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::WholeFile(_) => FrameKind::WholeFile,
            Frame::Chunk(_) => FrameKind::Chunk,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            Frame::WholeFile(f) => &f.filename,
            Frame::Chunk(f) => &f.filename,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Frame::WholeFile(f) => f.encode(),
            Frame::Chunk(f) => f.encode(),
        }
    }

    /// Decode one complete frame (one transport message).
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        require(&buf, 4, "kind")?;
        let raw = buf.get_i32();
        match FrameKind::from_i32(raw) {
            Some(FrameKind::WholeFile) => WholeFileFrame::decode(buf).map(Frame::WholeFile),
            Some(FrameKind::Chunk) => ChunkFrame::decode(buf).map(Frame::Chunk),
            None => Err(UploadError::MalformedFrame(format!(
                "unknown frame kind {}",
                raw
            ))),
        }
    }
}

// =============================================================================
// Field helpers
// =============================================================================

fn require(buf: &Bytes, needed: usize, field: &'static str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(UploadError::TruncatedFrame {
            field,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn get_string(buf: &mut Bytes, field: &'static str) -> Result<String> {
    require(buf, 4, field)?;
    let len = buf.get_i32();
    if len < 0 {
        return Err(UploadError::MalformedFrame(format!(
            "negative {} length {}",
            field, len
        )));
    }
    let len = len as usize;
    require(buf, len, field)?;
    String::from_utf8(buf.split_to(len).to_vec())
        .map_err(|_| UploadError::MalformedFrame(format!("invalid UTF-8 in {}", field)))
}

fn wire_len(field: &'static str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| UploadError::FieldTooLarge {
        field,
        value: len as u64,
    })
}

fn wire_size(field: &'static str, size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| UploadError::FieldTooLarge { field, value: size })
}

// =============================================================================
// Tests
// =============================================================================
